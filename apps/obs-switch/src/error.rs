use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
	#[error("OBS switcher error: {0}")]
	Switcher(#[from] obs_switcher::ObsSwitcherError),

	#[error("Configuration error: {0}")]
	Config(#[from] obs_switcher::ConfigError),

	#[error("Timeout: {0}")]
	Timeout(String),

	#[error("JSON serialization error: {0}")]
	Json(#[from] serde_json::Error),
}
