//! Name resolution results produced by the external semantic analyzer. The
//! middle end consumes these read-only: the validator uses value resolutions
//! to recognize banned ambient globals, and the pipeline uses the import
//! graph to order files.

use std::collections::BTreeMap;

use crate::frontend::{
    ast::{FileId, NodeId},
    intern::InternedSymbol,
};

/// A map between AST identifier nodes and their definitions
#[derive(Debug, Default)]
pub struct ResolutionMap {
    /// Maps the usage of value identifiers (variable names) to their point of
    /// original definition
    pub value_name_resolutions: BTreeMap<NodeId, ValueNameResolution>,
    /// Maps the usage of type identifiers to their point of original
    /// definition
    pub type_name_resolutions: BTreeMap<NodeId, TypeNameResolution>,
}

/// A resolved value name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueNameResolution {
    Local(NodeId),
    Parameter(NodeId),
    Definition(ValueDefinitionKind, NodeId),
    /// A global from the ambient environment, not declared in any source file
    Ambient(AmbientSymbol),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDefinitionKind {
    Function,
    Class,
    Enum,
}

/// The ambient globals the middle end knows about. Most exist only so the
/// validator can reject them by resolution instead of by spelling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbientSymbol {
    Eval,
    Proxy,
    Reflect,
    Object,
    Math,
    Console,
}

/// A resolved type name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeNameResolution {
    Definition(TypeDefinitionKind, NodeId),
    TypeParameter(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeDefinitionKind {
    Interface,
    Class,
    Alias,
    Enum,
}

/// For each source file, the `(imported_symbol, source_file)` pairs the module
/// resolver computed. Import cycles are the resolver's problem; by the time
/// the middle end runs the graph is acyclic
#[derive(Debug, Default)]
pub struct ImportGraph {
    pub edges: BTreeMap<FileId, Vec<(InternedSymbol, FileId)>>,
}

impl ImportGraph {
    /// Orders files so every file comes after the files it imports from.
    /// Ties break on file index, so the order is deterministic
    pub fn topological_order(&self, file_count: usize) -> Vec<FileId> {
        use crate::index::Index;

        let files: Vec<FileId> = (0..file_count).map(FileId::new).collect();
        let mut placed = vec![false; file_count];
        let mut order = Vec::with_capacity(file_count);

        while order.len() < file_count {
            let mut advanced = false;

            for &file in &files {
                if placed[file.index()] {
                    continue;
                }

                let deps_done = self
                    .edges
                    .get(&file)
                    .map(|deps| deps.iter().all(|(_, src)| placed[src.index()]))
                    .unwrap_or(true);

                if deps_done {
                    placed[file.index()] = true;
                    order.push(file);
                    advanced = true;
                }
            }

            // The resolver guarantees acyclicity; if it lied, fall back to
            // input order for the remainder rather than looping forever
            if !advanced {
                for &file in &files {
                    if !placed[file.index()] {
                        placed[file.index()] = true;
                        order.push(file);
                    }
                }
            }
        }

        order
    }
}
