use std::fmt::Write as _;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use conduit_core::{EnsureOrderKind, PositionState, StopOrderKind};
use serde::Serialize;
use tracing::{error, info};

use crate::report::{ErrorReport, SignalReport};
use crate::{NotificationReport, Notifier};

/// Delivers reports as HTML-formatted Telegram messages, matching the wire
/// shape of the original `TelegramService` (`POST {base}/sendMessage`,
/// `parse_mode: "HTML"`).
pub struct TelegramNotifier {
    base_url: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self::with_api_base(bot_token, chat_id, "https://api.telegram.org")
    }

    /// Builds a notifier pointed at an arbitrary API base, for tests that
    /// substitute a mock Telegram endpoint.
    pub fn with_api_base(bot_token: impl Into<String>, chat_id: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            base_url: format!("{}/bot{}", api_base.into(), bot_token.into()),
            chat_id: chat_id.into(),
            client: reqwest::Client::builder()
                .timeout(StdDuration::from_secs(10))
                .build()
                .expect("reqwest client"),
        }
    }

    async fn send_message(&self, text: &str) -> bool {
        #[derive(Serialize)]
        struct SendMessage<'a> {
            chat_id: &'a str,
            text: &'a str,
            parse_mode: &'a str,
        }

        let url = format!("{}/sendMessage", self.base_url);
        let payload = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
        };

        match self.client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                info!("telegram message sent successfully");
                true
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!(%status, %body, "telegram API rejected message");
                false
            }
            Err(err) => {
                error!(error = %err, "failed to send telegram message");
                false
            }
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, report: &NotificationReport) -> bool {
        let text = match report {
            NotificationReport::Success(r) => format_signal_report(r),
            NotificationReport::Failure(r) => format_error_report(r),
        };
        self.send_message(&text).await
    }
}

fn position_emoji(position: PositionState) -> &'static str {
    match position {
        PositionState::Long => "\u{2B06}\u{FE0F}",
        PositionState::Short => "\u{2B07}\u{FE0F}",
        PositionState::Flat => "\u{2796}",
    }
}

fn format_signal_report(report: &SignalReport) -> String {
    let signal = &report.signal;
    let mut out = String::new();
    let _ = writeln!(out, "\u{1F6CE}\u{FE0F} <b>Trading Signal</b>\n");
    let _ = writeln!(out, "<i>{}</i>", report.account);
    let _ = writeln!(
        out,
        "{}: {} <b>{:?}</b>",
        signal.instrument,
        position_emoji(signal.position),
        signal.position
    );

    let mut entry_parts = Vec::new();
    if let Some(price) = signal.entry_price {
        entry_parts.push(price.to_string());
    }
    if let Some(time) = signal.entry_time {
        entry_parts.push(time.to_rfc3339());
    }
    if !entry_parts.is_empty() {
        let _ = writeln!(out, "\u{25B6}\u{FE0F} {}", entry_parts.join(" @ "));
    }

    match &report.init_position {
        Some(p) => {
            let _ = writeln!(
                out,
                "\n\u{25C9} <b>Initial Position:</b> <b>{}</b> lots @ <b>{}</b>",
                p.quantity, p.average_price
            );
        }
        None => {
            let _ = writeln!(out, "\n\u{25C9} <b>Initial Position:</b> None");
        }
    }

    if !report.orders.is_empty() {
        let _ = writeln!(out, "\n\u{1F504} <b>Orders Placed</b>");
        for order in &report.orders {
            match order.kind {
                EnsureOrderKind::Buy | EnsureOrderKind::Sell => {
                    let arrow = if order.kind == EnsureOrderKind::Buy {
                        "\u{2B06}\u{FE0F}"
                    } else {
                        "\u{2B07}\u{FE0F}"
                    };
                    let fill_price = order
                        .fill
                        .map(|f| f.price.to_string())
                        .unwrap_or_else(|| "?".to_string());
                    let mut line = format!(
                        "{arrow} {:?} {} lots @ {fill_price} ({:?})",
                        order.kind, order.quantity, order.action
                    );
                    if let Some(slippage) = report.slippage.get(&order.order_id) {
                        let mut parts = Vec::new();
                        if let Some(price) = slippage.price {
                            parts.push(price.to_string());
                        }
                        if let Some(time) = slippage.time {
                            parts.push(format_duration(time));
                        }
                        if !parts.is_empty() {
                            let _ = write!(line, ", slp. {}", parts.join(" @ "));
                        }
                    }
                    let _ = writeln!(out, "{line}");
                }
                EnsureOrderKind::StopLoss => {
                    let price = order.price.map(|p| p.to_string()).unwrap_or_default();
                    let _ = writeln!(out, "\u{26D4} SL: {} lots @ {price}", order.quantity);
                }
                EnsureOrderKind::TakeProfit => {
                    let price = order.price.map(|p| p.to_string()).unwrap_or_default();
                    let _ = writeln!(out, "\u{1F3AF} TP: {} lots @ {price}", order.quantity);
                }
            }
        }
    }

    if let Some(profit) = report.profit {
        let emoji = if profit.is_sign_negative() { "\u{1F534}" } else { "\u{1F7E2}" };
        let _ = writeln!(out, "\n\u{1F4B0} <b>Profit</b>: {emoji} <b>{profit}</b>");
    }

    match &report.final_position {
        Some(p) => {
            let _ = writeln!(
                out,
                "\n\u{25CF} <b>Current Position:</b> <b>{}</b> lots @ <b>{}</b>",
                p.quantity, p.average_price
            );
        }
        None => {
            let _ = writeln!(out, "\n\u{25CF} <b>Current Position:</b> None");
        }
    }

    if !report.current_stops.is_empty() {
        let _ = writeln!(out, "\n\u{23F3} <b>Stop Orders</b>");
        let mut stops = report.current_stops.clone();
        stops.sort_by_key(|s| format!("{:?}", s.order_type));
        for stop in stops {
            let (label, price) = match stop.order_type {
                StopOrderKind::StopLoss => ("\u{26D4} SL", stop.stop_price),
                StopOrderKind::TakeProfit => ("\u{1F3AF} TP", stop.stop_price),
            };
            let price = price.map(|p| p.to_string()).unwrap_or_default();
            let _ = writeln!(
                out,
                "{label}: {:?} {} lots @ <b>{price}</b>",
                stop.direction, stop.quantity
            );
        }
    }

    out
}

fn format_error_report(report: &ErrorReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\u{26A0}\u{FE0F} <b>Signal Processing Failed</b>\n");
    let _ = writeln!(out, "<i>{}</i>", report.account);
    if let Some(instrument) = &report.instrument {
        let _ = writeln!(out, "{instrument}");
    }
    if let Some(position) = report.position {
        let _ = writeln!(out, "Target: {:?}", position);
    }
    let _ = writeln!(out, "\n<b>{}</b>: {}", report.code, report.message);
    out
}

/// Human-readable duration, e.g. `1d2h3m4s`, mirroring `utils.format_duration`.
fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.num_seconds();
    let sign = if total_seconds < 0 { "-" } else { "" };
    let total_seconds = total_seconds.unsigned_abs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    let mut out = String::new();
    if days > 0 {
        let _ = write!(out, "{days}d");
    }
    if hours > 0 {
        let _ = write!(out, "{hours}h");
    }
    if minutes > 0 {
        let _ = write!(out, "{minutes}m");
    }
    if seconds > 0 || out.is_empty() {
        let _ = write!(out, "{seconds}s");
    }

    format!("{sign}{out}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_whole_seconds() {
        assert_eq!(format_duration(Duration::seconds(5)), "5s");
    }

    #[test]
    fn formats_compound_duration() {
        assert_eq!(format_duration(Duration::seconds(90_061)), "1d1h1m1s");
    }

    #[test]
    fn formats_negative_duration() {
        assert_eq!(format_duration(Duration::seconds(-61)), "-1m1s");
    }

    #[test]
    fn zero_seconds_still_prints_seconds() {
        assert_eq!(format_duration(Duration::seconds(0)), "0s");
    }
}
