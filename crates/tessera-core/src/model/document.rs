//! Linked documents made of blocks. Only `Variable` blocks participate in
//! formula evaluation.

use serde::{Deserialize, Serialize};

use super::ids::{BlockId, DocumentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Text,
    Heading,
    /// `name = expression`; evaluated like a formula.
    Variable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    #[serde(default)]
    pub text: String,
}

impl Block {
    #[must_use]
    pub fn new(id: BlockId, kind: BlockKind, text: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            text: text.into(),
        }
    }

    #[must_use]
    pub const fn is_variable(&self) -> bool {
        matches!(self.kind, BlockKind::Variable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub name: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

impl Document {
    #[must_use]
    pub fn new(id: DocumentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            blocks: Vec::new(),
        }
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    #[must_use]
    pub fn block_index(&self, id: BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == id)
    }

    #[must_use]
    pub fn has_formula_artifacts(&self) -> bool {
        self.blocks.iter().any(Block::is_variable)
    }

    /// Text of every variable block.
    pub fn formula_texts(&self) -> impl Iterator<Item = &str> {
        self.blocks
            .iter()
            .filter(|b| b.is_variable())
            .map(|b| b.text.as_str())
    }
}
