//! The reasoning step collaborator.
//!
//! A [`Reasoner`] looks at the history and the available tools and either
//! proposes tool calls or produces a final answer. Model inference lives behind
//! this trait; the loop only sees [`ModelTurn`]s.

use crate::agent::message::{Message, ToolCall};
use crate::tools::ToolSpec;
use futures_util::future::BoxFuture;
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelTurn {
    pub fn final_answer(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn call(call: ToolCall) -> Self {
        Self {
            content: None,
            tool_calls: vec![call],
        }
    }

    pub fn calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content,
            tool_calls,
        }
    }

    /// No tool calls means the reasoner is done.
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("reasoning step failed: {message}")]
pub struct ReasonerError {
    pub message: String,
}

impl ReasonerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub trait Reasoner: Send + Sync {
    fn next_step<'a>(
        &'a self,
        history: &'a [Message],
        tools: &'a [ToolSpec],
    ) -> BoxFuture<'a, Result<ModelTurn, ReasonerError>>;
}
