//! Config validation: referential integrity of models, attributes and associations.

use crate::config::resolved::AssociationKind;
use crate::config::{FullConfig, ModelConfig};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

fn has_attribute(model: &ModelConfig, name: &str) -> bool {
    model.attributes.iter().any(|a| a.name == name)
}

fn require_attribute(model: &ModelConfig, name: &str) -> Result<(), ConfigError> {
    if has_attribute(model, name) {
        Ok(())
    } else {
        Err(ConfigError::MissingReference {
            kind: "attribute",
            id: format!("{}.{}", model.name, name),
        })
    }
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let mut models_by_name: HashMap<&str, &ModelConfig> = HashMap::new();
    for m in &config.models {
        if models_by_name.insert(m.name.as_str(), m).is_some() {
            return Err(ConfigError::DuplicateName(m.name.clone()));
        }
    }

    for m in &config.models {
        let mut names: HashSet<String> = HashSet::new();
        for a in &m.attributes {
            if !names.insert(a.name.clone()) {
                return Err(ConfigError::DuplicateName(format!("{}.{}", m.name, a.name)));
            }
            if a.primary_key && a.virtual_.is_some() {
                return Err(ConfigError::InvalidPrimaryKey {
                    model: m.name.clone(),
                    attribute: a.name.clone(),
                });
            }
        }
        if !m.attributes.iter().any(|a| a.primary_key) {
            return Err(ConfigError::MissingPrimaryKey { model: m.name.clone() });
        }

        for assoc in &m.associations {
            let target = models_by_name
                .get(assoc.target.as_str())
                .ok_or_else(|| ConfigError::MissingReference {
                    kind: "model",
                    id: assoc.target.clone(),
                })?;
            let alias = assoc.alias();
            if !names.insert(alias.clone()) {
                return Err(ConfigError::DuplicateName(format!("{}.{}", m.name, alias)));
            }
            match assoc.kind {
                AssociationKind::BelongsTo => {
                    require_attribute(m, &assoc.foreign_key)?;
                    if let Some(key) = &assoc.target_key {
                        require_attribute(target, key)?;
                    }
                }
                AssociationKind::HasOne | AssociationKind::HasMany => {
                    require_attribute(target, &assoc.foreign_key)?;
                    if let Some(key) = &assoc.target_key {
                        require_attribute(m, key)?;
                    }
                }
                AssociationKind::BelongsToMany => {
                    if assoc.through.is_none() {
                        return Err(ConfigError::Validation(format!(
                            "association {}.{} is BelongsToMany but declares no through table",
                            m.name, alias
                        )));
                    }
                    if let Some(key) = &assoc.target_key {
                        require_attribute(m, key)?;
                    }
                }
            }
        }
    }

    Ok(())
}
