use std::collections::BTreeMap;
use std::rc::Rc;

use crate::config::Config;
use crate::connection::Connection;
use crate::error::Result;
use crate::filter::Filter;
use crate::instance::{Instance, InstanceKey};

/// Every configured server × environment × stage, loaded on first use.
///
/// Built once per run. The task engine mutates the loaded instances in place,
/// so there is no refresh: the cache and the remote state move together.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: BTreeMap<InstanceKey, Instance>,
}

impl InstanceRegistry {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut instances = Vec::new();

        for (server_name, server) in &config.servers {
            let connection = Rc::new(Connection::from_server_config(server_name, server)?);

            for (environment, stages) in &server.environments {
                for stage in stages {
                    instances.push(Instance::new(
                        InstanceKey::new(server_name, environment, stage),
                        &server.path,
                        Rc::clone(&connection),
                        server.keep_installations,
                    ));
                }
            }
        }

        Ok(Self::from_instances(instances))
    }

    pub fn from_instances(instances: Vec<Instance>) -> Self {
        Self {
            instances: instances
                .into_iter()
                .map(|instance| (instance.key.clone(), instance))
                .collect(),
        }
    }

    /// Keys of all instances matching `filter`, each loaded before returning.
    pub fn instances_by_filter(&mut self, filter: &Filter) -> Result<Vec<InstanceKey>> {
        let mut keys = Vec::new();

        for (key, instance) in self.instances.iter_mut() {
            if !filter.matches(key) {
                continue;
            }
            instance.load()?;
            keys.push(key.clone());
        }

        Ok(keys)
    }

    pub fn get(&self, key: &InstanceKey) -> Option<&Instance> {
        self.instances.get(key)
    }

    pub fn get_mut(&mut self, key: &InstanceKey) -> Option<&mut Instance> {
        self.instances.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
