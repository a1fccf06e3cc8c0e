use crate::types::RobotProfile;
use anyhow::Context;
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Robot profiles keyed by robot name.
#[derive(Debug, Default, Clone)]
pub struct ProfileRegistry {
    pub robots: HashMap<String, RobotProfile>,
}

impl ProfileRegistry {
    pub fn insert(&mut self, profile: RobotProfile) {
        self.robots.insert(profile.name.clone(), profile);
    }

    pub fn lookup_robot(&self, name: &str) -> Option<&RobotProfile> {
        self.robots.get(name)
    }

    pub fn len(&self) -> usize {
        self.robots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.robots.is_empty()
    }
}

pub fn parse_profile(raw: &str) -> anyhow::Result<RobotProfile> {
    let val: Value = serde_yaml::from_str(raw).context("parsing yaml")?;
    let profile: RobotProfile = serde_yaml::from_value(val).context("decoding profile")?;
    // Surface format errors at load time for strict profiles.
    for proto in &profile.protocols {
        proto.parse_infos().with_context(|| {
            format!("{}: receive formats of {}", profile.name, proto.implementation)
        })?;
        proto.command_formats().with_context(|| {
            format!("{}: command formats of {}", profile.name, proto.implementation)
        })?;
    }
    Ok(profile)
}

pub fn load_profile_file(path: impl AsRef<Path>) -> anyhow::Result<RobotProfile> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading profile: {}", path.display()))?;
    parse_profile(&raw).with_context(|| format!("loading profile: {}", path.display()))
}

pub fn load_profiles_dir(dir: impl AsRef<Path>) -> anyhow::Result<ProfileRegistry> {
    let mut reg = ProfileRegistry::default();
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir.as_ref())? {
        let entry = entry?;
        let path = entry.path();
        if let Some(ext) = path.extension() {
            if ext == "yml" || ext == "yaml" {
                entries.push(path);
            }
        }
    }
    entries.sort();
    for p in entries {
        let profile = load_profile_file(&p)?;
        tracing::debug!(robot = %profile.name, path = %p.display(), "loaded robot profile");
        reg.insert(profile);
    }
    Ok(reg)
}
