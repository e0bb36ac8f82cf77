//! Wires a loaded `AppConfig` into the broker/notifier objects the
//! dispatcher needs, matching each account's `broker.name` to a connector.

use std::collections::HashMap;
use std::sync::Arc;

use conduit_broker::BrokerAdapter;
use conduit_config::AppConfig;
use conduit_core::{ErrorCode, TradingError, TradingResult};
use conduit_dispatch::SignalProcessor;
use conduit_notify::{Notifier, TelegramNotifier};
use conduit_tinvest::TInvestBroker;

/// Builds the broker for one account's `broker.name` / `broker.config` pair.
fn build_broker(name: &str, config: serde_json::Value) -> TradingResult<Arc<dyn BrokerAdapter>> {
    match name {
        "finam" => Ok(Arc::new(conduit_finam::FinamBroker::from_account_config(config)?) as Arc<dyn BrokerAdapter>),
        "tinvest" => Ok(Arc::new(TInvestBroker::from_account_config(config)?) as Arc<dyn BrokerAdapter>),
        "paper" => Ok(conduit_paper::PaperBroker::from_account_config(config)? as Arc<dyn BrokerAdapter>),
        other => Err(TradingError::new(
            ErrorCode::ConfigError,
            format!("unknown broker backend: {other}"),
        )),
    }
}

/// Builds one `SignalProcessor` per configured account, all sharing a single
/// `TelegramNotifier` (spec §6: one `telegram` block at the document root).
pub fn build_processors(config: &AppConfig) -> TradingResult<HashMap<String, Arc<SignalProcessor>>> {
    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(
        config.telegram.bot_token.clone(),
        config.telegram.chat_id.to_string(),
    ));

    let mut processors = HashMap::with_capacity(config.accounts.len());
    for (account, account_config) in &config.accounts {
        let broker = build_broker(&account_config.broker.name, account_config.broker.config.clone())
            .map_err(|err| TradingError::new(err.code, format!("account '{account}': {}", err.message)))?;
        processors.insert(
            account.clone(),
            Arc::new(SignalProcessor::new(account.clone(), broker, notifier.clone())),
        );
    }
    Ok(processors)
}
