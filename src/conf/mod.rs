//! Provides application configuration options.
//!
//! Options can be parsed from config files in TOML format and overridden
//! through `ARGO_*` environment variables.

pub mod ice;
pub mod retry;

use std::{collections::HashMap, env};

use config::{
    Config, ConfigError, Environment, File, FileFormat, Source, Value,
};
use failure::Error;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

#[doc(inline)]
pub use self::{
    ice::{Ice, IceServer},
    retry::Retry,
};

/// CLI argument that is responsible for holding application configuration
/// file path.
static APP_CONF_PATH_CMD_ARG_NAME: &str = "--conf";

/// Environment variable that is responsible for holding application
/// configuration file path.
pub static APP_CONF_PATH_ENV_VAR_NAME: &str = "ARGO_CONF";

/// All configuration settings of the application.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Conf {
    /// [ICE] servers settings.
    ///
    /// [ICE]: https://webrtcglossary.com/ice
    pub ice: Ice,

    /// Per-peer connection retry settings.
    pub retry: Retry,
}

impl Source for Conf {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<HashMap<String, Value>, ConfigError> {
        let serialized = toml::to_string(self).unwrap();
        File::from_str(serialized.as_str(), FileFormat::Toml).collect()
    }
}

impl Conf {
    /// Creates new [`Conf`] and applies values from the following sources,
    /// in that order:
    /// - default values;
    /// - configuration file, the name of which is given as a command line
    ///   parameter or environment variable;
    /// - environment variables.
    pub fn parse() -> Result<Self, Error> {
        let mut cfg = Config::new();

        cfg.merge(Self::default())?;

        if let Some(path) = get_conf_file_name(
            env::var(APP_CONF_PATH_ENV_VAR_NAME),
            env::args(),
        ) {
            cfg.merge(File::with_name(&path))?;
        }

        cfg.merge(Environment::with_prefix("ARGO").separator("__"))?;

        Ok(cfg.try_into()?)
    }
}

/// Returns the name of the configuration file, if any is defined.
fn get_conf_file_name<T>(
    env_var: Result<String, env::VarError>,
    cmd_args: T,
) -> Option<String>
where
    T: IntoIterator<Item = String>,
{
    if let Ok(path) = env_var {
        return Some(path);
    }
    let mut args = cmd_args
        .into_iter()
        .skip_while(|a| a != APP_CONF_PATH_CMD_ARG_NAME);
    args.next()?;
    args.next()
}
