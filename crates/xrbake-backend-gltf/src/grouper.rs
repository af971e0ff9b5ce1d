//! Geometry grouping.
//!
//! Primitives whose attribute assignments agree are clustered into one
//! [`Geometry`] so they can later share a single interleaved vertex buffer.

use std::collections::HashSet;

use crate::document::{Accessor, AttributeMap, Document, Mesh};
use crate::error::{Warning, WarningCode};

/// A maximal set of attribute assignments shared by one or more primitives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Geometry {
    pub attributes: AttributeMap,
    pub targets: Option<Vec<AttributeMap>>,
}

impl Geometry {
    fn from_primitive(attributes: &AttributeMap, targets: &Option<Vec<AttributeMap>>) -> Self {
        Self {
            attributes: attributes.clone(),
            targets: targets.clone(),
        }
    }

    /// True if a primitive with these assignments may join this geometry.
    ///
    /// Shared attribute names must reference the same accessor, and once the
    /// geometry has morph targets the primitive's target list must be equal
    /// to it by content.
    pub fn accepts(&self, attributes: &AttributeMap, targets: &Option<Vec<AttributeMap>>) -> bool {
        if self.targets.is_some() && self.targets != *targets {
            return false;
        }
        attributes
            .iter()
            .all(|(name, accessor)| self.attributes.get(name).map_or(true, |a| a == accessor))
    }

    fn absorb(&mut self, attributes: &AttributeMap, targets: &Option<Vec<AttributeMap>>) {
        for (name, accessor) in attributes {
            self.attributes.entry(name.clone()).or_insert(*accessor);
        }
        if self.targets.is_none() {
            self.targets = targets.clone();
        }
    }

    /// Accessor indices in interleaving order: attributes, then morph targets.
    pub fn accessor_indices(&self) -> Vec<usize> {
        let mut out: Vec<usize> = self.attributes.values().copied().collect();
        for target in self.targets.iter().flatten() {
            out.extend(target.values().copied());
        }
        out
    }

    fn accessor_slots_mut(&mut self) -> impl Iterator<Item = &mut usize> + '_ {
        self.attributes
            .values_mut()
            .chain(self.targets.iter_mut().flatten().flat_map(|t| t.values_mut()))
    }
}

/// Result of grouping every primitive of a document.
#[derive(Debug, Clone, Default)]
pub struct Grouping {
    pub geometries: Vec<Geometry>,
    /// Geometry index per `[mesh][primitive]`; `None` for skipped primitives.
    pub assignments: Vec<Vec<Option<usize>>>,
    pub warnings: Vec<Warning>,
}

impl Grouping {
    /// Primitives (mesh, primitive) assigned to geometry `geometry`.
    pub fn members(&self, geometry: usize) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for (m, prims) in self.assignments.iter().enumerate() {
            for (p, g) in prims.iter().enumerate() {
                if *g == Some(geometry) {
                    out.push((m, p));
                }
            }
        }
        out
    }
}

/// Cluster primitives into geometries.
///
/// Primitives are visited in document order; each joins the first existing
/// geometry that accepts it (absorbing attribute names the geometry lacks) or
/// starts a new one. Non-triangle primitives are skipped with a warning.
pub fn group_primitives(meshes: &[Mesh]) -> Grouping {
    let mut grouping = Grouping::default();

    for (m, mesh) in meshes.iter().enumerate() {
        let mut assigned = Vec::with_capacity(mesh.primitives.len());
        for (p, prim) in mesh.primitives.iter().enumerate() {
            if !prim.is_triangles() {
                grouping.warnings.push(Warning::new(
                    WarningCode::NonTriangleTopology,
                    format!(
                        "mesh {} primitive {} uses mode {}, not triangles; left ungrouped",
                        m,
                        p,
                        prim.mode.unwrap_or_default()
                    ),
                ));
                assigned.push(None);
                continue;
            }

            let found = grouping
                .geometries
                .iter()
                .position(|g| g.accepts(&prim.attributes, &prim.targets));
            let index = match found {
                Some(i) => {
                    grouping.geometries[i].absorb(&prim.attributes, &prim.targets);
                    i
                }
                None => {
                    grouping
                        .geometries
                        .push(Geometry::from_primitive(&prim.attributes, &prim.targets));
                    grouping.geometries.len() - 1
                }
            };
            assigned.push(Some(index));
        }
        grouping.assignments.push(assigned);
    }

    tracing::debug!(
        geometries = grouping.geometries.len(),
        "grouped primitives into geometries"
    );
    grouping
}

/// Give every geometry exclusive ownership of its accessors.
///
/// An accessor claimed by an earlier geometry (or twice by the same one) is
/// cloned so that relocating it into one interleaved block cannot break the
/// other reference. Returns the number of clones made.
pub fn split_shared_accessors(doc: &mut Document, grouping: &mut Grouping) -> usize {
    let mut claimed = HashSet::new();
    let mut clones = 0;
    for geometry in &mut grouping.geometries {
        for slot in geometry.accessor_slots_mut() {
            if !claimed.insert(*slot) {
                let copy: Accessor = doc.accessors[*slot].clone();
                doc.accessors.push(copy);
                *slot = doc.accessors.len() - 1;
                claimed.insert(*slot);
                clones += 1;
            }
        }
    }
    clones
}

/// Replace each grouped primitive's attributes and targets with its geometry's.
pub fn apply_geometries(doc: &mut Document, grouping: &Grouping) {
    for (m, prims) in grouping.assignments.iter().enumerate() {
        for (p, g) in prims.iter().enumerate() {
            let Some(g) = g else { continue };
            let geometry = &grouping.geometries[*g];
            let prim = &mut doc.meshes[m].primitives[p];
            prim.attributes = geometry.attributes.clone();
            if geometry.targets.is_some() {
                prim.targets = geometry.targets.clone();
            }
        }
    }
}
