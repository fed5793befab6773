//! Named kinematic tree.
//!
//! A model is authored as a [`Link`] value that owns its children, then
//! frozen into a [`KinematicTree`].  The tree stores links in pre-order in an
//! index-addressed arena (root at index 0, every parent before its children)
//! with parallel arrays for the per-frame joint values and the per-session
//! calibration offsets, so the per-frame hot loop never walks or allocates a
//! pointer tree.
//!
//! Forward kinematics composes `parent_offset * joint` from the root down to
//! a link.  World poses are never cached: any joint may change every frame.
//!
//! # Example
//!
//! ```rust
//! use imumocap_kinematics::transform::Transform;
//! use imumocap_kinematics::tree::{KinematicTree, Link};
//!
//! let root = Link::new("pelvis")
//!     .with_offset(Transform::from_translation(0.0, 1.0, 0.0))
//!     .with_child(Link::new("thigh").with_offset(Transform::from_translation(0.0, -0.5, 0.0)));
//!
//! let mut tree = KinematicTree::new(root).unwrap();
//! let thigh = tree.id("thigh").unwrap();
//!
//! let before = tree.world_pose(thigh).translation();
//! assert!((before.y - 0.5).abs() < 1e-9);
//!
//! // Swing the pelvis 90° forward: the thigh origin moves off the vertical.
//! tree.set_joint("pelvis", Transform::rot_x(90.0)).unwrap();
//! let after = tree.world_pose(thigh).translation();
//! assert!((after.y - 1.0).abs() < 1e-9);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use imumocap_types::MocapError;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::transform::Transform;

/// Per-tick sensor input: link name → global orientation.
pub type Readings = BTreeMap<String, Transform>;

// ────────────────────────────────────────────────────────────────────────────
// Authoring type
// ────────────────────────────────────────────────────────────────────────────

/// A link as authored by a model definition, owning its children.
///
/// The `joint` given here becomes the link's rest joint once the tree is
/// built.
#[derive(Debug, Clone)]
pub struct Link {
    pub name: String,
    pub parent_offset: Transform,
    pub joint: Transform,
    pub children: Vec<Link>,
}

impl Link {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_offset: Transform::identity(),
            joint: Transform::identity(),
            children: Vec::new(),
        }
    }

    pub fn with_offset(mut self, parent_offset: Transform) -> Self {
        self.parent_offset = parent_offset;
        self
    }

    pub fn with_joint(mut self, joint: Transform) -> Self {
        self.joint = joint;
        self
    }

    pub fn with_child(mut self, child: Link) -> Self {
        self.children.push(child);
        self
    }

    /// Append a child and return a handle to it for further nesting.
    pub fn add_child(&mut self, child: Link) -> &mut Link {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }
}

// ────────────────────────────────────────────────────────────────────────────
// KinematicTree
// ────────────────────────────────────────────────────────────────────────────

/// Index of a link inside the [`KinematicTree`] it came from.
///
/// Ids equal the link's position in [`KinematicTree::flatten`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(usize);

impl LinkId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<LinkId>,
    children: Vec<LinkId>,
    parent_offset: Transform,
    rest_joint: Transform,
}

/// Outcome of [`KinematicTree::apply_imu_globals`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriveReport {
    /// Number of links whose joint was rewritten.
    pub driven: usize,
    /// Reading names that matched no link; those readings were ignored.
    pub unknown: Vec<String>,
}

/// A strict tree of uniquely named links with mutable joints.
#[derive(Debug, Clone)]
pub struct KinematicTree {
    nodes: Vec<Node>,
    joints: Vec<Transform>,
    calibrations: Vec<Option<Transform>>,
    index: HashMap<String, LinkId>,
}

impl KinematicTree {
    /// Freeze an authored link hierarchy into a tree.
    ///
    /// Fails with [`MocapError::DuplicateLink`] when two links share a name
    /// and [`MocapError::InvalidLink`] when a name is blank.
    pub fn new(root: Link) -> Result<Self, MocapError> {
        let mut nodes: Vec<Node> = Vec::new();
        let mut joints = Vec::new();
        let mut index = HashMap::new();

        // Children are pushed in reverse so they pop in authored order, which
        // yields a pre-order numbering.
        let mut stack: Vec<(Link, Option<LinkId>)> = vec![(root, None)];
        while let Some((link, parent)) = stack.pop() {
            let Link {
                name,
                parent_offset,
                joint,
                children,
            } = link;

            if name.trim().is_empty() {
                return Err(MocapError::InvalidLink(
                    "link name must not be empty".to_string(),
                ));
            }
            let id = LinkId(nodes.len());
            if index.insert(name.clone(), id).is_some() {
                return Err(MocapError::DuplicateLink(name));
            }
            if let Some(p) = parent {
                nodes[p.0].children.push(id);
            }
            nodes.push(Node {
                name,
                parent,
                children: Vec::with_capacity(children.len()),
                parent_offset,
                rest_joint: joint,
            });
            joints.push(joint);

            for child in children.into_iter().rev() {
                stack.push((child, Some(id)));
            }
        }

        let calibrations = vec![None; nodes.len()];
        tracing::debug!(links = nodes.len(), "kinematic tree built");
        Ok(Self {
            nodes,
            joints,
            calibrations,
            index,
        })
    }

    /// Number of links, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: a tree has at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> LinkRef<'_> {
        LinkRef {
            tree: self,
            id: LinkId(0),
        }
    }

    /// Every link in pre-order: root first, each parent before its children,
    /// siblings in authored order.  The order only depends on structure.
    pub fn flatten(&self) -> Vec<LinkRef<'_>> {
        self.links().collect()
    }

    /// Lazy form of [`KinematicTree::flatten`].
    pub fn links(&self) -> impl Iterator<Item = LinkRef<'_>> + '_ {
        (0..self.nodes.len()).map(move |i| LinkRef {
            tree: self,
            id: LinkId(i),
        })
    }

    /// Name-indexed view of every link.
    pub fn dictionary(&self) -> HashMap<&str, LinkRef<'_>> {
        self.links().map(|l| (l.name(), l)).collect()
    }

    /// Look up a link id by name.
    pub fn id(&self, name: &str) -> Result<LinkId, MocapError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| MocapError::UnknownLink(name.to_string()))
    }

    pub fn link(&self, name: &str) -> Result<LinkRef<'_>, MocapError> {
        Ok(LinkRef {
            tree: self,
            id: self.id(name)?,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// # Panics
    ///
    /// If `id` was issued by a tree with more links than this one.
    pub fn name(&self, id: LinkId) -> &str {
        &self.nodes[id.0].name
    }

    // ── Joints ────────────────────────────────────────────────────────────

    /// # Panics
    ///
    /// If `id` does not belong to this tree.
    pub fn joint(&self, id: LinkId) -> &Transform {
        &self.joints[id.0]
    }

    /// Overwrite one joint by id.
    ///
    /// # Panics
    ///
    /// If `id` does not belong to this tree.
    pub fn set_joint_at(&mut self, id: LinkId, joint: Transform) {
        self.joints[id.0] = joint;
    }

    pub fn set_joint(&mut self, name: &str, joint: Transform) -> Result<(), MocapError> {
        let id = self.id(name)?;
        self.set_joint_at(id, joint);
        Ok(())
    }

    pub fn rest_joint(&self, id: LinkId) -> &Transform {
        &self.nodes[id.0].rest_joint
    }

    /// Put every joint back to its authored rest value.
    pub fn reset_to_rest(&mut self) {
        for (joint, node) in self.joints.iter_mut().zip(&self.nodes) {
            *joint = node.rest_joint;
        }
    }

    // ── Calibration offsets ───────────────────────────────────────────────

    /// Sensor-to-link offset of a link; `None` means identity.
    ///
    /// # Panics
    ///
    /// If `id` does not belong to this tree.
    pub fn calibration(&self, id: LinkId) -> Option<&Transform> {
        self.calibrations[id.0].as_ref()
    }

    /// Store (or clear, with `None`) the offset of one link.
    ///
    /// # Panics
    ///
    /// If `id` does not belong to this tree.
    pub fn set_calibration(&mut self, id: LinkId, offset: Option<Transform>) {
        self.calibrations[id.0] = offset;
    }

    pub fn clear_calibrations(&mut self) {
        self.calibrations.iter_mut().for_each(|c| *c = None);
    }

    pub fn calibrated_count(&self) -> usize {
        self.calibrations.iter().filter(|c| c.is_some()).count()
    }

    // ── Forward kinematics ────────────────────────────────────────────────

    /// Absolute pose of a link: `parent_offset * joint` composed from the
    /// root down to `id`.
    pub fn world_pose(&self, id: LinkId) -> Transform {
        self.chain(id, |i| &self.joints[i])
    }

    /// World poses of every link, indexed like [`KinematicTree::flatten`].
    pub fn world_poses(&self) -> Vec<Transform> {
        let mut poses: Vec<Transform> = Vec::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            let local = node.parent_offset * self.joints[i];
            let pose = match node.parent {
                Some(p) => poses[p.0] * local,
                None => local,
            };
            poses.push(pose);
        }
        poses
    }

    /// Frame in which the joint of `id` acts: the parent's world pose
    /// composed with this link's `parent_offset`.
    pub fn parent_frame(&self, id: LinkId) -> Transform {
        let node = &self.nodes[id.0];
        match node.parent {
            Some(p) => self.world_pose(p) * node.parent_offset,
            None => node.parent_offset,
        }
    }

    /// [`KinematicTree::parent_frame`] with every ancestor at its rest joint.
    pub fn rest_parent_frame(&self, id: LinkId) -> Transform {
        let node = &self.nodes[id.0];
        match node.parent {
            Some(p) => self.chain(p, |i| &self.nodes[i].rest_joint) * node.parent_offset,
            None => node.parent_offset,
        }
    }

    fn chain<'a>(&'a self, id: LinkId, joint_of: impl Fn(usize) -> &'a Transform) -> Transform {
        let mut pose = Transform::identity();
        let mut current = Some(id);
        while let Some(LinkId(i)) = current {
            let node = &self.nodes[i];
            pose = node.parent_offset * *joint_of(i) * pose;
            current = node.parent;
        }
        pose
    }

    // ── Sensor driving ────────────────────────────────────────────────────

    /// Derive the local joint of `id` from a sensor orientation already in
    /// the world frame.
    ///
    /// The joint rotation becomes `A⁻¹ · G · C⁻¹` (see
    /// [`local_joint_from_global`]); its translation is kept.  Afterwards
    /// the link's world orientation equals `G · C⁻¹`.
    pub fn set_joint_from_imu_global(&mut self, id: LinkId, global: &Transform) {
        let frame = self.parent_frame(id);
        let local = local_joint_from_global(&frame, self.calibrations[id.0].as_ref(), global);
        let translation = self.joints[id.0].translation();
        self.joints[id.0] = local.with_translation(translation);
    }

    /// Drive every link named in `readings`.
    ///
    /// Links are visited in pre-order so each parent is updated before its
    /// children, whatever the iteration order of the map.  Names that match
    /// no link are skipped and reported; links without a reading keep their
    /// current joint.
    pub fn apply_imu_globals(&mut self, readings: &Readings) -> DriveReport {
        let unknown: Vec<String> = readings
            .keys()
            .filter(|name| !self.index.contains_key(name.as_str()))
            .cloned()
            .collect();

        let mut driven = 0;
        for i in 0..self.nodes.len() {
            if let Some(global) = readings.get(&self.nodes[i].name) {
                self.set_joint_from_imu_global(LinkId(i), global);
                driven += 1;
            }
        }
        DriveReport { driven, unknown }
    }

    // ── Snapshots ─────────────────────────────────────────────────────────

    /// Current joint of every link, in pre-order.
    pub fn snapshot(&self) -> PoseSnapshot {
        PoseSnapshot {
            entries: self
                .nodes
                .iter()
                .zip(&self.joints)
                .map(|(n, j)| (n.name.clone(), *j))
                .collect(),
        }
    }

    /// World pose of every link, in pre-order.
    pub fn world_snapshot(&self) -> PoseSnapshot {
        PoseSnapshot {
            entries: self
                .nodes
                .iter()
                .zip(self.world_poses())
                .map(|(n, p)| (n.name.clone(), p))
                .collect(),
        }
    }

    /// Overwrite every joint from a snapshot.
    ///
    /// The snapshot must name exactly the links of this tree; nothing is
    /// written when it does not.
    pub fn apply_snapshot(&mut self, snapshot: &PoseSnapshot) -> Result<(), MocapError> {
        let mut staged: Vec<Option<Transform>> = vec![None; self.nodes.len()];
        for (name, joint) in snapshot.iter() {
            let id = self.id(name)?;
            staged[id.0] = Some(*joint);
        }
        if let Some(i) = staged.iter().position(Option::is_none) {
            return Err(MocapError::MissingLink(self.nodes[i].name.clone()));
        }
        for (joint, value) in self.joints.iter_mut().zip(staged.into_iter().flatten()) {
            *joint = value;
        }
        Ok(())
    }
}

/// `A⁻¹ · G · C⁻¹`: the local joint rotation that makes a link whose joint
/// acts in frame `parent_frame` (rotation `A`) reach world orientation
/// `G · C⁻¹`, where `G` is the sensor reading and `C` the calibration offset
/// (identity when `None`).  Translations are ignored; the result is a pure
/// rotation.
pub fn local_joint_from_global(
    parent_frame: &Transform,
    calibration: Option<&Transform>,
    global: &Transform,
) -> Transform {
    let offset_inv = calibration
        .map(|c| c.rotation_only().inverse())
        .unwrap_or_default();
    parent_frame.rotation_only().inverse() * global.rotation_only() * offset_inv
}

// ────────────────────────────────────────────────────────────────────────────
// LinkRef
// ────────────────────────────────────────────────────────────────────────────

/// Borrowed view of one link of a [`KinematicTree`].
#[derive(Clone, Copy)]
pub struct LinkRef<'a> {
    tree: &'a KinematicTree,
    id: LinkId,
}

impl<'a> LinkRef<'a> {
    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn name(&self) -> &'a str {
        &self.tree.nodes[self.id.0].name
    }

    pub fn parent(&self) -> Option<LinkRef<'a>> {
        self.tree.nodes[self.id.0].parent.map(|id| LinkRef {
            tree: self.tree,
            id,
        })
    }

    pub fn children(&self) -> impl Iterator<Item = LinkRef<'a>> + use<'a> {
        let tree = self.tree;
        tree.nodes[self.id.0]
            .children
            .iter()
            .map(move |&id| LinkRef { tree, id })
    }

    pub fn parent_offset(&self) -> &'a Transform {
        &self.tree.nodes[self.id.0].parent_offset
    }

    pub fn joint(&self) -> &'a Transform {
        &self.tree.joints[self.id.0]
    }

    pub fn rest_joint(&self) -> &'a Transform {
        &self.tree.nodes[self.id.0].rest_joint
    }

    pub fn calibration(&self) -> Option<&'a Transform> {
        self.tree.calibrations[self.id.0].as_ref()
    }

    pub fn world_pose(&self) -> Transform {
        self.tree.world_pose(self.id)
    }
}

impl fmt::Debug for LinkRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkRef")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PoseSnapshot
// ────────────────────────────────────────────────────────────────────────────

/// Ordered link name → transform mapping capturing one frame.
///
/// Entries keep the order they were inserted in; snapshots taken from a tree
/// are in pre-order, so serialising the same pose twice yields identical
/// bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseSnapshot {
    entries: Vec<(String, Transform)>,
}

impl PoseSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry; new names are appended.
    pub fn insert(&mut self, name: impl Into<String>, transform: Transform) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = transform,
            None => self.entries.push((name, transform)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Transform> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Transform)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Transform)> for PoseSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Transform)>>(iter: I) -> Self {
        let mut snapshot = PoseSnapshot::new();
        for (name, transform) in iter {
            snapshot.insert(name, transform);
        }
        snapshot
    }
}

impl Serialize for PoseSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, transform) in &self.entries {
            map.serialize_entry(name, transform)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PoseSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SnapshotVisitor;

        impl<'de> Visitor<'de> for SnapshotVisitor {
            type Value = PoseSnapshot;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of link names to transforms")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut snapshot = PoseSnapshot::new();
                while let Some((name, transform)) = access.next_entry::<String, Transform>()? {
                    snapshot.insert(name, transform);
                }
                Ok(snapshot)
            }
        }

        deserializer.deserialize_map(SnapshotVisitor)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
