//! Shared test utilities and fixtures
//!
//! A scripted gateway that answers each role from its own queue and records
//! every request it receives.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use lemmaloop_engine::lemmaloop_providers::retry::RetryConfig;
use lemmaloop_engine::{
    Budgets, CallPolicy, EngineSettings, Gateway, GatewayError, GatewayRequest, Role,
    ScalingFactor,
};

pub type Reply = Result<String, GatewayError>;

#[derive(Default)]
pub struct ScriptedGateway {
    queues: Mutex<HashMap<Role, VecDeque<Reply>>>,
    /// Replayed forever once a role's queue is empty.
    fallback: Mutex<HashMap<Role, String>>,
    requests: Mutex<Vec<(Role, String)>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue replies for `role`, answered in order.
    pub fn replies<S: Into<String>>(self, role: Role, replies: impl IntoIterator<Item = S>) -> Self {
        self.queues
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .extend(replies.into_iter().map(|r| Ok(r.into())));
        self
    }

    pub fn error(self, role: Role, error: GatewayError) -> Self {
        self.queues
            .lock()
            .unwrap()
            .entry(role)
            .or_default()
            .push_back(Err(error));
        self
    }

    /// Answer `role` with `reply` whenever its queue is empty.
    pub fn always(self, role: Role, reply: &str) -> Self {
        self.fallback
            .lock()
            .unwrap()
            .insert(role, reply.to_string());
        self
    }

    pub fn calls(&self, role: Role) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .count()
    }

    pub fn inputs(&self, role: Role) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, input)| input.clone())
            .collect()
    }
}

impl Gateway for ScriptedGateway {
    async fn call(&self, request: GatewayRequest<'_>) -> Result<String, GatewayError> {
        self.requests
            .lock()
            .unwrap()
            .push((request.role, request.input.to_string()));

        let queued = self
            .queues
            .lock()
            .unwrap()
            .get_mut(&request.role)
            .and_then(VecDeque::pop_front);
        if let Some(reply) = queued {
            return reply;
        }
        self.fallback
            .lock()
            .unwrap()
            .get(&request.role)
            .cloned()
            .ok_or_else(|| GatewayError::Fatal(format!("unscripted {} call", request.role)))
    }
}

/// Settings with one verification attempt and millisecond backoff.
pub fn settings(budgets: Budgets) -> EngineSettings {
    EngineSettings {
        budgets,
        calls: CallPolicy {
            retries: budgets.call_retries,
            timeout: Duration::from_secs(5),
            streaming: true,
            backoff: RetryConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                jitter_factor: 0.0,
                ..RetryConfig::default()
            },
        },
        ..EngineSettings::default()
    }
}

pub fn single_attempt() -> Budgets {
    Budgets {
        verification_scaling: ScalingFactor::SINGLE,
        ..Budgets::default()
    }
}

pub fn intermediate(statement: &str, deps: &[u64]) -> String {
    format!(
        "<conjecture>{statement}</conjecture>\n<proof>Proof of {statement}.</proof>\n<dependency>{deps:?}</dependency>"
    )
}

pub fn final_answer(statement: &str, deps: &[u64]) -> String {
    format!(
        "<final_conjecture>{statement}</final_conjecture>\n<proof>Proof of {statement}.</proof>\n<dependency>{deps:?}</dependency>"
    )
}

pub const VALID: &str = "Every step checks out.\n\\boxed{valid}";
pub const INVALID: &str = "Step 2 divides by zero.\n\\boxed{invalid}";
