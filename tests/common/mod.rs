#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use election_mailer::email::OutgoingEmail;
use election_mailer::error::TransportError;
use election_mailer::operator::Operator;
use election_mailer::transport::Transport;

type Responder = dyn Fn(&str, usize) -> Result<(), TransportError> + Send + Sync;

/// Transport answering from a closure of (recipient, attempt number for that recipient).
pub struct ScriptedTransport {
    calls: Arc<Mutex<Vec<String>>>,
    respond: Box<Responder>,
}

impl ScriptedTransport {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&str, usize) -> Result<(), TransportError> + Send + Sync + 'static,
    {
        ScriptedTransport {
            calls: Arc::new(Mutex::new(Vec::new())),
            respond: Box::new(respond),
        }
    }

    pub fn always_ok() -> Self {
        Self::new(|_, _| Ok(()))
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
        let recipient = email.recipient();
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(recipient.clone());
            calls.iter().filter(|r| **r == recipient).count()
        };
        (self.respond)(&recipient, attempt)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Operator with a canned answer. `None` never answers.
pub struct ScriptedOperator {
    pub answer: Option<String>,
    pub prompts: Vec<String>,
    pub ticks: Vec<u64>,
}

impl ScriptedOperator {
    pub fn answering(answer: &str) -> Self {
        ScriptedOperator {
            answer: Some(answer.to_string()),
            prompts: Vec::new(),
            ticks: Vec::new(),
        }
    }

    pub fn silent() -> Self {
        ScriptedOperator {
            answer: None,
            prompts: Vec::new(),
            ticks: Vec::new(),
        }
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn ask(&mut self, prompt: &str) -> Result<String> {
        self.prompts.push(prompt.to_string());
        match &self.answer {
            Some(answer) => Ok(answer.clone()),
            None => std::future::pending().await,
        }
    }

    fn show_remaining(&mut self, remaining_secs: u64) {
        self.ticks.push(remaining_secs);
    }
}

/// Cancels `token` after `millis` of (paused) tokio time.
pub fn cancel_after(token: &CancellationToken, millis: u64) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
        token.cancel();
    });
}
