pub mod execution_service;
pub mod news_listener;
pub mod signal_service;
pub mod telegram_service;
