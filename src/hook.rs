//! Host hook wire format.
//!
//! The host sends one JSON object on stdin when its turn ends and reads an
//! optional JSON object from stdout. Allowing the stop is signalled by
//! printing nothing.

use serde::{Deserialize, Serialize};

use crate::domain::Directive;
use crate::error::Result;

/// Turn-end event as sent by the host. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookInput {
    pub session_id: String,
    pub cwd: Option<String>,
    pub transcript_path: Option<String>,
    pub stop_hook_active: bool,
}

impl HookInput {
    /// Parse the stdin payload; blank input is an event with no session
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(raw)?)
    }

    /// True when this stop follows a turn we already blocked
    pub fn is_continuation(&self) -> bool {
        self.stop_hook_active
    }
}

/// Reply that keeps the host working
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookResponse {
    /// Always `block`
    pub decision: String,
    /// Instruction fed back to the host as its next prompt
    pub reason: String,
    /// Short status line shown to the operator
    #[serde(rename = "systemMessage", skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
}

impl HookResponse {
    /// `None` for `Allow`
    pub fn from_directive(directive: &Directive) -> Option<Self> {
        match directive {
            Directive::Allow => None,
            Directive::Block { reason, status } => Some(Self {
                decision: "block".to_string(),
                reason: reason.clone(),
                system_message: if status.is_empty() { None } else { Some(status.clone()) },
            }),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
