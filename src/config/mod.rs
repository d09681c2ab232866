use serde::{Serialize, Deserialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use crate::fit::{EvdSettings, ManifoldSettings};
use crate::optim::WeightOptSettings;
use crate::session::SessionSettings;
use crate::eval::EvalSettings;
use crate::error::UlcaError;

/// All tunables, as read from a JSON file. Missing sections and fields take
/// their default values, so an empty object is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {

    pub evd : EvdSettings,

    pub manifold : ManifoldSettings,

    pub weight_opt : WeightOptSettings,

    pub session : SessionSettings,

    pub eval : EvalSettings

}

impl Config {

    pub fn load_from_path<P>(path : P) -> Result<Self, UlcaError>
    where
        P : AsRef<Path>
    {
        let f = File::open(path)?;
        Self::load(f)
    }

    pub fn load<R>(mut reader : R) -> Result<Self, UlcaError>
    where
        R : Read
    {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_to_path<P>(&self, path : P) -> Result<(), UlcaError>
    where
        P : AsRef<Path>
    {
        let file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
        self.save(file)
    }

    pub fn save<W>(&self, mut writer : W) -> Result<(), UlcaError>
    where
        W : Write
    {
        let content = serde_json::to_string_pretty(self)?;
        writer.write_all(content.as_bytes())?;
        Ok(())
    }

}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::fit::Manifold;

    #[test]
    fn partial_config_keeps_defaults() {
        let json = r#"{
            "evd" : { "n_components" : 3 },
            "manifold" : { "manifold" : "stiefel" },
            "weight_opt" : { "w_area" : { "move" : 0.1, "scale" : 0.9 } },
            "session" : { "max_alpha" : 20.0 }
        }"#;
        let config = Config::load(json.as_bytes()).unwrap();
        assert_eq!(config.evd.n_components, 3);
        assert_eq!(config.evd.max_iter, 100);
        assert_eq!(config.manifold.manifold, Manifold::Stiefel);
        assert!(config.manifold.apply_varimax);
        assert_eq!(config.weight_opt.w_area.on_scale, 0.9);
        assert_eq!(config.weight_opt.w_dist.on_move, 0.8);
        assert_eq!(config.weight_opt.max_iter, 50);
        assert_eq!(config.session.max_alpha, 20.0);
        assert!(config.session.alpha.is_none());
    }

    #[test]
    fn round_trips_through_json() {
        let mut buf = Vec::new();
        Config::default().save(&mut buf).unwrap();
        let back = Config::load(&buf[..]).unwrap();
        assert_eq!(back.manifold.min_grad_norm, 1e-2);
        assert!(Config::load("{ \"evd\" : 1 }".as_bytes()).is_err());
    }

}
