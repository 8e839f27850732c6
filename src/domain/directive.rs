//! The controller's answer to a turn-end event

/// What the host should do when its turn ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Let the host go idle normally
    Allow,
    /// Keep the host working, feeding it `reason` as the next instruction
    Block { reason: String, status: String },
}

impl Directive {
    pub fn block(reason: impl Into<String>, status: impl Into<String>) -> Self {
        Directive::Block {
            reason: reason.into(),
            status: status.into(),
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Directive::Block { .. })
    }

    /// Rendered text carried by a block directive
    pub fn reason(&self) -> Option<&str> {
        match self {
            Directive::Block { reason, .. } => Some(reason),
            Directive::Allow => None,
        }
    }
}
