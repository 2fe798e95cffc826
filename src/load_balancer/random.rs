//! Uniform random load balancing strategy.

use std::sync::Arc;

use rand::Rng;

use crate::load_balancer::{backend::Backend, LoadBalancer};

#[derive(Debug, Default)]
pub struct RandomPick;

impl RandomPick {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RandomPick {
    fn next_server(&self, backends: &[Arc<Backend>], _key: Option<&str>) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..backends.len());
        Some(backends[index].clone())
    }
}
