use crate::error::{Result, TestbedError};
use serde::de::DeserializeOwned;
use std::{ffi::OsStr, path::Path};

/// Deserialise a YAML config file into `T`. Every component config loads
/// through here so a missing file and a bad field fail the same way.
///
/// * `filepath`: path to the YAML file.
pub fn from_yaml_file<T, F>(filepath: F) -> Result<T>
where
    T: DeserializeOwned,
    F: AsRef<OsStr>,
{
    let file = Path::new(&filepath);
    if !file.is_file() {
        return Err(TestbedError::InvalidConfiguration(format!(
            "could not locate the config file {file:?}"
        )));
    }

    let config_file = ::config::Config::builder()
        .add_source(::config::File::new(
            &file.to_string_lossy(),
            ::config::FileFormat::Yaml,
        ))
        .build()?;

    Ok(config_file.try_deserialize::<T>()?)
}
