//! Taxon Index
//!
//! In-memory classification built once per run from the flat taxon list.
//! Taxa live in an arena indexed by slot; two adjacency lists hold the
//! primary-parent tree edges and the secondary-parent extra edges.
//!
//! The canonical ancestor chain (used for attribute inheritance and by
//! diffusion) follows primary edges only. Secondary edges are consulted
//! only by [`TaxonIndex::is_also_reachable_under`].

use std::collections::{HashMap, VecDeque};
use thiserror::Error;

use sos_common::models::{Taxon, TaxonAttributes};

/// Conventional scientific name of the root taxon
pub const ROOT_SCIENTIFIC_NAME: &str = "Biota";

/// Longest primary-parent chain accepted from a taxon to the root
pub const MAX_DEPTH: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaxonIndexError {
    #[error("duplicate taxon id {0}")]
    DuplicateId(i32),

    #[error("taxon {taxon_id} does not reach the root within {max_depth} steps")]
    CyclicHierarchy { taxon_id: i32, max_depth: usize },

    #[error("secondary parent {parent_id} of taxon {taxon_id} closes a cycle")]
    CyclicSecondaryParent { taxon_id: i32, parent_id: i32 },

    #[error("taxon {taxon_id} references unknown parent {parent_id}")]
    UnknownParent { taxon_id: i32, parent_id: i32 },

    #[error("no root taxon (every taxon has a parent)")]
    MissingRoot,

    #[error("multiple root taxa: {0:?}")]
    MultipleRoots(Vec<i32>),

    #[error("taxon {0} not found")]
    NotFound(i32),
}

/// Immutable taxon tree, safe to share across workers
#[derive(Debug)]
pub struct TaxonIndex {
    taxa: Vec<Taxon>,
    slot_by_id: HashMap<i32, usize>,
    slot_by_name: HashMap<String, usize>,
    primary_parent: Vec<Option<usize>>,
    secondary_parents: Vec<Vec<usize>>,
    children: Vec<Vec<usize>>,
    /// Attributes after inheritance, per slot
    resolved: Vec<TaxonAttributes>,
    root: usize,
}

impl TaxonIndex {
    /// Build the index, validating ids, the single root and both edge sets
    pub fn build(taxa: Vec<Taxon>) -> Result<Self, TaxonIndexError> {
        let mut slot_by_id = HashMap::with_capacity(taxa.len());
        for (slot, taxon) in taxa.iter().enumerate() {
            if slot_by_id.insert(taxon.id, slot).is_some() {
                return Err(TaxonIndexError::DuplicateId(taxon.id));
            }
        }

        let mut roots: Vec<usize> = Vec::new();
        let mut primary_parent = Vec::with_capacity(taxa.len());
        let mut secondary_parents = Vec::with_capacity(taxa.len());
        let mut children = vec![Vec::new(); taxa.len()];

        for (slot, taxon) in taxa.iter().enumerate() {
            let parent = match taxon.parent_id {
                Some(parent_id) => {
                    let parent_slot = *slot_by_id.get(&parent_id).ok_or(
                        TaxonIndexError::UnknownParent {
                            taxon_id: taxon.id,
                            parent_id,
                        },
                    )?;
                    children[parent_slot].push(slot);
                    Some(parent_slot)
                }
                None => {
                    roots.push(slot);
                    None
                }
            };
            primary_parent.push(parent);

            let mut extra = Vec::with_capacity(taxon.secondary_parent_ids.len());
            for parent_id in &taxon.secondary_parent_ids {
                let parent_slot = *slot_by_id.get(parent_id).ok_or(
                    TaxonIndexError::UnknownParent {
                        taxon_id: taxon.id,
                        parent_id: *parent_id,
                    },
                )?;
                extra.push(parent_slot);
            }
            secondary_parents.push(extra);
        }

        let root = match roots.as_slice() {
            [] => return Err(TaxonIndexError::MissingRoot),
            [root] => *root,
            many => {
                return Err(TaxonIndexError::MultipleRoots(
                    many.iter().map(|slot| taxa[*slot].id).collect(),
                ))
            }
        };

        if taxa[root].scientific_name != ROOT_SCIENTIFIC_NAME {
            tracing::warn!(
                root_id = taxa[root].id,
                root_name = %taxa[root].scientific_name,
                "Root taxon is not named {}", ROOT_SCIENTIFIC_NAME
            );
        }

        let depth = primary_depths(&taxa, &primary_parent, root)?;
        check_secondary_edges(&taxa, &primary_parent, &secondary_parents)?;

        // Parents resolve before children when processed by ascending depth
        let mut by_depth: Vec<usize> = (0..taxa.len()).collect();
        by_depth.sort_by_key(|slot| depth[*slot]);
        let mut resolved: Vec<TaxonAttributes> =
            taxa.iter().map(|taxon| taxon.attributes.clone()).collect();
        for slot in by_depth {
            if let Some(parent) = primary_parent[slot] {
                let inherited = resolved[parent].clone();
                resolved[slot].inherit_from(&inherited);
            }
        }

        let mut slot_by_name = HashMap::with_capacity(taxa.len());
        for (slot, taxon) in taxa.iter().enumerate() {
            slot_by_name
                .entry(taxon.scientific_name.trim().to_lowercase())
                .or_insert(slot);
        }

        tracing::info!(taxa = taxa.len(), "Taxon index built");

        Ok(Self {
            taxa,
            slot_by_id,
            slot_by_name,
            primary_parent,
            secondary_parents,
            children,
            resolved,
            root,
        })
    }

    pub fn len(&self) -> usize {
        self.taxa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taxa.is_empty()
    }

    pub fn root(&self) -> &Taxon {
        &self.taxa[self.root]
    }

    pub fn lookup(&self, taxon_id: i32) -> Result<&Taxon, TaxonIndexError> {
        self.slot(taxon_id).map(|slot| &self.taxa[slot])
    }

    /// Case-insensitive lookup; the first taxon listed with the name wins
    pub fn lookup_by_scientific_name(&self, name: &str) -> Option<&Taxon> {
        self.slot_by_name
            .get(&name.trim().to_lowercase())
            .map(|slot| &self.taxa[*slot])
    }

    /// Taxon followed by its primary ancestors, ending with the root
    pub fn ancestor_chain(&self, taxon_id: i32) -> Result<Vec<&Taxon>, TaxonIndexError> {
        let mut slot = self.slot(taxon_id)?;
        let mut chain = vec![&self.taxa[slot]];
        while let Some(parent) = self.primary_parent[slot] {
            chain.push(&self.taxa[parent]);
            slot = parent;
        }
        Ok(chain)
    }

    /// Attributes with unset fields inherited from the nearest ancestor
    pub fn resolved_attributes(&self, taxon_id: i32) -> Result<&TaxonAttributes, TaxonIndexError> {
        self.slot(taxon_id).map(|slot| &self.resolved[slot])
    }

    /// Primary-tree descendant test; a taxon is under itself
    pub fn is_under(&self, taxon_id: i32, ancestor_id: i32) -> bool {
        match self.ancestor_chain(taxon_id) {
            Ok(chain) => chain.iter().any(|taxon| taxon.id == ancestor_id),
            Err(_) => false,
        }
    }

    /// Descendant test over primary and secondary edges
    pub fn is_also_reachable_under(&self, taxon_id: i32, ancestor_id: i32) -> bool {
        let (Ok(start), Ok(target)) = (self.slot(taxon_id), self.slot(ancestor_id)) else {
            return false;
        };

        let mut visited = vec![false; self.taxa.len()];
        let mut queue = VecDeque::from([start]);
        while let Some(slot) = queue.pop_front() {
            if slot == target {
                return true;
            }
            if std::mem::replace(&mut visited[slot], true) {
                continue;
            }
            queue.extend(self.primary_parent[slot]);
            queue.extend(self.secondary_parents[slot].iter().copied());
        }
        false
    }

    pub fn secondary_parents(&self, taxon_id: i32) -> Result<Vec<&Taxon>, TaxonIndexError> {
        let slot = self.slot(taxon_id)?;
        Ok(self.secondary_parents[slot]
            .iter()
            .map(|parent| &self.taxa[*parent])
            .collect())
    }

    /// Primary children
    pub fn children(&self, taxon_id: i32) -> Result<Vec<&Taxon>, TaxonIndexError> {
        let slot = self.slot(taxon_id)?;
        Ok(self.children[slot]
            .iter()
            .map(|child| &self.taxa[*child])
            .collect())
    }

    fn slot(&self, taxon_id: i32) -> Result<usize, TaxonIndexError> {
        self.slot_by_id
            .get(&taxon_id)
            .copied()
            .ok_or(TaxonIndexError::NotFound(taxon_id))
    }
}

/// Depth of every slot along primary edges, bounded by [`MAX_DEPTH`]
fn primary_depths(
    taxa: &[Taxon],
    primary_parent: &[Option<usize>],
    root: usize,
) -> Result<Vec<usize>, TaxonIndexError> {
    let mut depth: Vec<Option<usize>> = vec![None; taxa.len()];
    depth[root] = Some(0);

    for start in 0..taxa.len() {
        if depth[start].is_some() {
            continue;
        }

        let mut path = vec![start];
        let mut current = start;
        let base = loop {
            match primary_parent[current] {
                Some(parent) => {
                    if let Some(known) = depth[parent] {
                        break known;
                    }
                    if path.len() > MAX_DEPTH {
                        return Err(TaxonIndexError::CyclicHierarchy {
                            taxon_id: taxa[start].id,
                            max_depth: MAX_DEPTH,
                        });
                    }
                    path.push(parent);
                    current = parent;
                }
                // Only the root has no parent and its depth is known
                None => break 0,
            }
        };

        for (offset, slot) in path.iter().rev().enumerate() {
            let value = base + offset + 1;
            if value > MAX_DEPTH {
                return Err(TaxonIndexError::CyclicHierarchy {
                    taxon_id: taxa[start].id,
                    max_depth: MAX_DEPTH,
                });
            }
            depth[*slot] = Some(value);
        }
    }

    Ok(depth.into_iter().map(|d| d.unwrap_or(0)).collect())
}

/// Reject secondary edges that close a cycle in the combined parent graph
///
/// The primary tree is already known to be acyclic, so any cycle found
/// here runs through a secondary edge.
fn check_secondary_edges(
    taxa: &[Taxon],
    primary_parent: &[Option<usize>],
    secondary_parents: &[Vec<usize>],
) -> Result<(), TaxonIndexError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    let parents_of = |slot: usize| {
        primary_parent[slot]
            .into_iter()
            .chain(secondary_parents[slot].iter().copied())
            .collect::<Vec<_>>()
    };

    let mut marks = vec![Mark::New; taxa.len()];
    for start in 0..taxa.len() {
        if marks[start] != Mark::New {
            continue;
        }

        // Iterative DFS: (slot, parents, next parent index)
        let mut stack = vec![(start, parents_of(start), 0usize)];
        marks[start] = Mark::Active;

        while let Some((slot, parents, next)) = stack.last_mut() {
            if *next == parents.len() {
                marks[*slot] = Mark::Done;
                stack.pop();
                continue;
            }
            let parent = parents[*next];
            *next += 1;
            let child = *slot;

            match marks[parent] {
                Mark::Active => {
                    return Err(TaxonIndexError::CyclicSecondaryParent {
                        taxon_id: taxa[child].id,
                        parent_id: taxa[parent].id,
                    })
                }
                Mark::Done => {}
                Mark::New => {
                    marks[parent] = Mark::Active;
                    stack.push((parent, parents_of(parent), 0));
                }
            }
        }
    }

    Ok(())
}
