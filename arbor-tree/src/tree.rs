//! Tree metadata: the entry count, byte totals, cluster tables and the branch hierarchy.

use arbor_buffer::{RBuffer, WBuffer};
use arbor_error::{ArborResult, arbor_bail, arbor_err};

use crate::arena::{Arena, BranchId, LeafId};
use crate::branch::{Branch, marshal_branches, marshal_leaves};
use crate::leaf::Leaf;
use crate::options::DEFAULT_ENTRY_OFFSET_LEN;
use crate::wire::{AttFill, AttLine, AttMarker, IoFeatures, Named, ObjArray};

const TREE_VERSION: i16 = 20;
const NTUPLE_VERSION: i16 = 2;

/// Class name of trees.
pub const TREE_CLASS: &str = "TTree";
/// Class name of ntuples, trees of `f32` columns.
pub const NTUPLE_CLASS: &str = "TNtuple";

/// Cluster boundaries: entries up to `ranges[i]` are grouped in clusters of `sizes[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clusters {
    /// Last entry of every cluster range.
    pub ranges: Vec<i64>,
    /// Cluster size of every range.
    pub sizes: Vec<i64>,
}

/// A table of entries stored as branches.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub(crate) named: Named,
    att_line: AttLine,
    att_fill: AttFill,
    att_marker: AttMarker,
    pub(crate) entries: i64,
    pub(crate) tot_bytes: i64,
    pub(crate) zip_bytes: i64,
    saved_bytes: i64,
    flushed_bytes: i64,
    weight: f64,
    timer_interval: i32,
    scan_field: i32,
    update: i32,
    default_entry_offset_len: i32,
    max_entries: i64,
    max_entry_loop: i64,
    max_virtual_size: i64,
    auto_save: i64,
    auto_flush: i64,
    estimate: i64,
    clusters: Clusters,
    iobits: IoFeatures,
    pub(crate) branches: Vec<BranchId>,
    pub(crate) leaves: Vec<LeafId>,
    pub(crate) arena: Arena,
    nvars: Option<i32>,
}

impl Tree {
    /// An empty tree.
    pub fn new(name: &str, title: &str) -> Self {
        Self {
            named: Named::new(name, title),
            att_line: AttLine::default(),
            att_fill: AttFill::default(),
            att_marker: AttMarker::default(),
            entries: 0,
            tot_bytes: 0,
            zip_bytes: 0,
            saved_bytes: 0,
            flushed_bytes: 0,
            weight: 1.0,
            timer_interval: 0,
            scan_field: 25,
            update: 0,
            default_entry_offset_len: DEFAULT_ENTRY_OFFSET_LEN,
            max_entries: 1_000_000_000_000,
            max_entry_loop: 1_000_000_000_000,
            max_virtual_size: 0,
            auto_save: -300_000_000,
            auto_flush: -30_000_000,
            estimate: 1_000_000,
            clusters: Clusters::default(),
            iobits: IoFeatures::default(),
            branches: Vec::new(),
            leaves: Vec::new(),
            arena: Arena::default(),
            nvars: None,
        }
    }

    /// Name of the tree.
    pub fn name(&self) -> &str {
        &self.named.name
    }

    /// Title of the tree.
    pub fn title(&self) -> &str {
        &self.named.title
    }

    /// Persisted class.
    pub fn class(&self) -> &'static str {
        if self.nvars.is_some() {
            NTUPLE_CLASS
        } else {
            TREE_CLASS
        }
    }

    /// Number of entries.
    pub fn entries(&self) -> u64 {
        u64::try_from(self.entries).unwrap_or(0)
    }

    /// Uncompressed bytes of all baskets, keys included.
    pub fn tot_bytes(&self) -> i64 {
        self.tot_bytes
    }

    /// Compressed bytes of all baskets, keys included.
    pub fn zip_bytes(&self) -> i64 {
        self.zip_bytes
    }

    /// Cluster boundaries.
    pub fn clusters(&self) -> &Clusters {
        &self.clusters
    }

    /// Number of variables of an ntuple.
    pub fn nvars(&self) -> Option<i32> {
        self.nvars
    }

    /// Top-level branches.
    pub fn branches(&self) -> &[BranchId] {
        &self.branches
    }

    /// All leaves, in declaration order.
    pub fn leaves(&self) -> &[LeafId] {
        &self.leaves
    }

    /// Storage of the branches and leaves.
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// The branch at `id`.
    pub fn branch(&self, id: BranchId) -> ArborResult<&Branch> {
        self.arena.branch(id)
    }

    /// The leaf at `id`.
    pub fn leaf(&self, id: LeafId) -> ArborResult<&Leaf> {
        self.arena.leaf(id)
    }

    /// Find a branch by name, nested branches included.
    pub fn find_branch(&self, name: &str) -> Option<BranchId> {
        self.arena.find_branch(&self.branches, name)
    }

    /// Find a leaf by name, or the first leaf of the branch with that name.
    pub fn find_leaf(&self, name: &str) -> Option<LeafId> {
        self.arena.find_leaf(&self.branches, name)
    }

    /// Decode a record of class `class`, a tree or an ntuple.
    pub fn decode(class: &str, data: &[u8]) -> ArborResult<Self> {
        let mut r = RBuffer::new(data, 0);
        let tree = match class {
            TREE_CLASS => Self::unmarshal(&mut r)?,
            NTUPLE_CLASS => Self::unmarshal_ntuple(&mut r)?,
            other => arbor_bail!(InvalidSerde: "{} is not a tree class", other),
        };
        if r.remaining() != 0 {
            log::debug!("{} trailing bytes after tree {}", r.remaining(), tree.name());
        }
        Ok(tree)
    }

    /// Encode the tree as a record of its class.
    pub fn encode(&self) -> ArborResult<Vec<u8>> {
        let mut w = WBuffer::new(0);
        self.marshal(&mut w)?;
        Ok(w.into_vec())
    }

    /// Decode a `TTree` record.
    pub fn unmarshal(r: &mut RBuffer<'_>) -> ArborResult<Self> {
        let hdr = r.read_version()?;
        if hdr.version <= 4 {
            arbor_bail!(InvalidSerde: "TTree: version too old ({} <= 4)", hdr.version);
        }
        if hdr.version > TREE_VERSION {
            arbor_bail!(InvalidSerde: "TTree: unsupported version {}", hdr.version);
        }
        let v = hdr.version;

        let named = Named::unmarshal(r)?;
        let att_line = AttLine::unmarshal(r)?;
        let att_fill = AttFill::unmarshal(r)?;
        let att_marker = AttMarker::unmarshal(r)?;

        let mut tree = Self::new(&named.name, &named.title);
        tree.named = named;
        tree.att_line = att_line;
        tree.att_fill = att_fill;
        tree.att_marker = att_marker;

        #[allow(clippy::cast_possible_truncation)]
        let counter = |r: &mut RBuffer<'_>| -> ArborResult<i64> {
            if v > 5 {
                r.read_i64()
            } else {
                Ok(r.read_f64()? as i64)
            }
        };
        tree.entries = counter(r)?;
        tree.tot_bytes = counter(r)?;
        tree.zip_bytes = counter(r)?;
        tree.saved_bytes = counter(r)?;
        if v >= 18 {
            tree.flushed_bytes = r.read_i64()?;
        }
        if v >= 16 {
            tree.weight = r.read_f64()?;
        }
        tree.timer_interval = r.read_i32()?;
        tree.scan_field = r.read_i32()?;
        tree.update = r.read_i32()?;
        if v >= 17 {
            tree.default_entry_offset_len = r.read_i32()?;
        }
        let nclus = if v >= 19 { r.read_i32()? } else { 0 };
        let nclus = usize::try_from(nclus)
            .map_err(|_| arbor_err!(InvalidSerde: "TTree: negative cluster count {}", nclus))?;
        if v > 5 {
            tree.max_entries = r.read_i64()?;
        }
        let wide = |r: &mut RBuffer<'_>| -> ArborResult<i64> {
            if v > 5 {
                r.read_i64()
            } else {
                Ok(i64::from(r.read_i32()?))
            }
        };
        tree.max_entry_loop = wide(r)?;
        tree.max_virtual_size = wide(r)?;
        tree.auto_save = wide(r)?;
        if v >= 18 {
            tree.auto_flush = r.read_i64()?;
        }
        tree.estimate = wide(r)?;
        if v >= 19 {
            r.read_i8()?;
            tree.clusters.ranges = r.read_fast_array(nclus)?;
            r.read_i8()?;
            tree.clusters.sizes = r.read_fast_array(nclus)?;
        }
        if v >= 20 {
            tree.iobits = IoFeatures::unmarshal(r)?;
        }

        let arena = &mut tree.arena;
        let branches = ObjArray::unmarshal(r, |class, r| arena.decode_object(class, r))?;
        tree.branches = branches
            .elems
            .into_iter()
            .flatten()
            .map(|obj| arena.branch_id(obj))
            .collect::<ArborResult<Vec<_>>>()?;
        let leaves = ObjArray::unmarshal(r, |class, r| arena.decode_object(class, r))?;
        tree.leaves = leaves
            .elems
            .into_iter()
            .flatten()
            .map(|obj| arena.leaf_id(obj))
            .collect::<ArborResult<Vec<_>>>()?;

        // aliases, index values, index, tree index, friends, user info, branch ref
        let refs = if v > 5 { 7 } else { 2 };
        for _ in 0..refs {
            if let Some(obj) = r.read_object_any(|class, r| arena.decode_object(class, r))? {
                log::debug!("TTree {}: ignoring attached object {}", tree.named.name, obj.0);
            }
        }
        r.check_byte_count(&hdr, TREE_CLASS)?;
        Ok(tree)
    }

    /// Decode a `TNtuple` record.
    pub fn unmarshal_ntuple(r: &mut RBuffer<'_>) -> ArborResult<Self> {
        let hdr = r.read_version()?;
        if hdr.version > NTUPLE_VERSION {
            arbor_bail!(InvalidSerde: "TNtuple: unsupported version {}", hdr.version);
        }
        let mut tree = Self::unmarshal(r)?;
        tree.nvars = Some(r.read_i32()?);
        r.check_byte_count(&hdr, NTUPLE_CLASS)?;
        Ok(tree)
    }

    /// Encode the tree record, without its class tag.
    pub fn marshal(&self, w: &mut WBuffer) -> ArborResult<()> {
        match self.nvars {
            Some(nvars) => {
                let beg = w.write_version(NTUPLE_VERSION);
                self.marshal_tree(w)?;
                w.write_i32(nvars);
                w.set_byte_count(beg)
            }
            None => self.marshal_tree(w),
        }
    }

    fn marshal_tree(&self, w: &mut WBuffer) -> ArborResult<()> {
        let beg = w.write_version(TREE_VERSION);
        self.named.marshal(w)?;
        self.att_line.marshal(w)?;
        self.att_fill.marshal(w)?;
        self.att_marker.marshal(w)?;
        w.write_i64(self.entries);
        w.write_i64(self.tot_bytes);
        w.write_i64(self.zip_bytes);
        w.write_i64(self.saved_bytes);
        w.write_i64(self.flushed_bytes);
        w.write_f64(self.weight);
        w.write_i32(self.timer_interval);
        w.write_i32(self.scan_field);
        w.write_i32(self.update);
        w.write_i32(self.default_entry_offset_len);
        if self.clusters.ranges.len() != self.clusters.sizes.len() {
            arbor_bail!(
                InvalidArgument: "TTree {}: {} cluster ranges for {} sizes",
                self.name(),
                self.clusters.ranges.len(),
                self.clusters.sizes.len()
            );
        }
        let nclus = i32::try_from(self.clusters.ranges.len())
            .map_err(|_| arbor_err!(InvalidArgument: "too many cluster ranges"))?;
        w.write_i32(nclus);
        w.write_i64(self.max_entries);
        w.write_i64(self.max_entry_loop);
        w.write_i64(self.max_virtual_size);
        w.write_i64(self.auto_save);
        w.write_i64(self.auto_flush);
        w.write_i64(self.estimate);
        w.write_i8(0);
        w.write_fast_array(&self.clusters.ranges);
        w.write_i8(0);
        w.write_fast_array(&self.clusters.sizes);
        self.iobits.marshal(w)?;

        marshal_branches(w, "", &self.branches, &self.arena)?;
        marshal_leaves(w, "", &self.leaves, &self.arena)?;
        for _ in 0..7 {
            w.write_object_any(None, |_| Ok(()))?;
        }
        w.set_byte_count(beg)
    }
}

#[cfg(test)]
mod tests {
    use arbor_compress::Compression;

    use super::*;
    use crate::leaf::ElementKind;

    fn sample() -> Tree {
        let mut tree = Tree::new("events", "a sample tree");
        let n = tree
            .arena
            .push_leaf(Leaf::new("n", ElementKind::I32, 1, None).unwrap());
        let x = tree
            .arena
            .push_leaf(Leaf::new("x", ElementKind::F64, 1, Some((n, "n"))).unwrap());
        for (name, title, leaf, offset_len) in [("n", "n/I", n, 0), ("x", "x[n]/D", x, 1000)] {
            let branch = Branch::new(
                name,
                title.to_string(),
                vec![leaf],
                Compression::ZLIB_DEFAULT,
                32000,
                offset_len,
                10,
            );
            let id = tree.arena.push_branch(branch).unwrap();
            tree.branches.push(id);
            tree.leaves.push(leaf);
        }
        tree.entries = 42;
        tree.clusters = Clusters {
            ranges: vec![41],
            sizes: vec![42],
        };
        tree
    }

    #[test]
    fn tree_round_trip() {
        let tree = sample();
        let bytes = tree.encode().unwrap();
        let back = Tree::decode(TREE_CLASS, &bytes).unwrap();
        assert_eq!(back, tree);
        assert_eq!(back.encode().unwrap(), bytes);
    }

    #[test]
    fn count_leaves_are_shared() {
        let back = Tree::decode(TREE_CLASS, &sample().encode().unwrap()).unwrap();
        let n = back.find_leaf("n").unwrap();
        let x = back.leaf(back.find_leaf("x").unwrap()).unwrap();
        assert_eq!(x.count(), Some(n));
        assert_eq!(back.arena().leaves().len(), 2);
        assert_eq!(back.branch(back.find_branch("x").unwrap()).unwrap().title(), "x[n]/D");
        assert!(back.find_branch("y").is_none());
    }

    #[test]
    fn ntuples_carry_their_variable_count() {
        let mut tree = sample();
        tree.nvars = Some(2);
        let bytes = tree.encode().unwrap();
        let back = Tree::decode(NTUPLE_CLASS, &bytes).unwrap();
        assert_eq!(back.nvars(), Some(2));
        assert_eq!(back.class(), NTUPLE_CLASS);
        assert!(Tree::decode(TREE_CLASS, &bytes).is_err());
    }

    #[test]
    fn truncated_records_fail() {
        let bytes = sample().encode().unwrap();
        assert!(Tree::decode(TREE_CLASS, &bytes[..bytes.len() - 3]).is_err());
        assert!(Tree::decode("TH1F", &bytes).is_err());
    }

    /// A version 6 tree has neither flushed bytes, weight, default entry offset length, auto
    /// flush, cluster tables nor iobits.
    #[test]
    fn old_versions_skip_later_fields() {
        let mut w = WBuffer::new(0);
        let beg = w.write_version(6);
        Named::new("old", "").marshal(&mut w).unwrap();
        AttLine::default().marshal(&mut w).unwrap();
        AttFill::default().marshal(&mut w).unwrap();
        AttMarker::default().marshal(&mut w).unwrap();
        for v in [7i64, 100, 50, 0] {
            w.write_i64(v);
        }
        w.write_i32(0);
        w.write_i32(25);
        w.write_i32(0);
        for v in [1i64 << 40, 1 << 40, 0, -300_000_000, 1_000_000] {
            w.write_i64(v);
        }
        ObjArray::marshal(&mut w, "", &[], |_, _| Ok(())).unwrap();
        ObjArray::marshal(&mut w, "", &[], |_, _| Ok(())).unwrap();
        for _ in 0..7 {
            w.write_object_any(None, |_| Ok(())).unwrap();
        }
        w.set_byte_count(beg).unwrap();

        let tree = Tree::decode(TREE_CLASS, &w.into_vec()).unwrap();
        assert_eq!(tree.entries(), 7);
        assert_eq!(tree.tot_bytes(), 100);
        assert!(tree.clusters().ranges.is_empty());
        assert_eq!(tree.default_entry_offset_len, DEFAULT_ENTRY_OFFSET_LEN);
    }

    #[test]
    fn ancient_versions_are_rejected() {
        let mut w = WBuffer::new(0);
        let beg = w.write_version(4);
        w.set_byte_count(beg).unwrap();
        let err = Tree::decode(TREE_CLASS, &w.into_vec()).unwrap_err();
        assert!(err.to_string().contains("too old"));
    }
}
