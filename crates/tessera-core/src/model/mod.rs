//! In-memory project model.
//!
//! A [`Project`] is plain owned data: cloning it yields a fully independent
//! deep copy. The background persistence worker relies on that to keep a
//! mirror it can mutate without ever touching the interactive copy.

pub mod document;
pub mod ids;
pub mod table;

use serde::{Deserialize, Serialize};

pub use document::{Block, BlockKind, Document};
pub use ids::{
    BlockId, ColumnId, DocumentId, ExprId, InstanceId, RowId, TableId, VariantId, ViewId,
};
pub use table::{
    Cell, CellOverride, CellValue, Column, ColumnKind, DerivedConfig, RelationMode,
    RelationTarget, Row, SortKey, Table, TableVariable, VariableKind, VariantDelta, View,
    ViewFilter,
};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub documents: Vec<Document>,
}

impl Project {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Independent copy for the persistence mirror.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    #[must_use]
    pub fn table(&self, id: TableId) -> Option<&Table> {
        self.tables.iter().find(|t| t.id == id)
    }

    #[must_use]
    pub fn table_mut(&mut self, id: TableId) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.id == id)
    }

    #[must_use]
    pub fn table_index(&self, id: TableId) -> Option<usize> {
        self.tables.iter().position(|t| t.id == id)
    }

    #[must_use]
    pub fn document(&self, id: DocumentId) -> Option<&Document> {
        self.documents.iter().find(|d| d.id == id)
    }

    #[must_use]
    pub fn document_mut(&mut self, id: DocumentId) -> Option<&mut Document> {
        self.documents.iter_mut().find(|d| d.id == id)
    }

    #[must_use]
    pub fn has_formula_artifacts(&self) -> bool {
        self.tables.iter().any(Table::has_formula_artifacts)
            || self.documents.iter().any(Document::has_formula_artifacts)
    }

    /// Tables that contain formula artifacts, in declaration order.
    pub fn formula_tables(&self) -> impl Iterator<Item = TableId> + '_ {
        self.tables
            .iter()
            .filter(|t| t.has_formula_artifacts())
            .map(|t| t.id)
    }

    /// Documents that contain formula artifacts, in declaration order.
    pub fn formula_documents(&self) -> impl Iterator<Item = DocumentId> + '_ {
        self.documents
            .iter()
            .filter(|d| d.has_formula_artifacts())
            .map(|d| d.id)
    }

    /// Whether any formula anywhere in the project mentions `name`.
    #[must_use]
    pub fn formulas_mention(&self, name: &str) -> bool {
        let tables = self.tables.iter().flat_map(Table::formula_texts);
        let documents = self.documents.iter().flat_map(Document::formula_texts);
        tables
            .chain(documents)
            .any(|text| expression_mentions(text, name))
    }
}

/// Whether `expression` refers to `name` as an identifier.
///
/// Identifier-shaped names match whole tokens only (`Qty` does not match
/// `QtyTotal`). Names containing other characters (spaces, punctuation) are
/// matched as substrings, which can only over-report.
#[must_use]
pub fn expression_mentions(expression: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    if !name.chars().all(is_ident) {
        return expression.contains(name);
    }
    expression
        .split(|c: char| !is_ident(c))
        .any(|token| token == name)
}
