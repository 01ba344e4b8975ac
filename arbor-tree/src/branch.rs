//! Branch metadata: the span tables, the leaves and the nested branches of one column.

use arbor_buffer::{RBuffer, WBuffer};
use arbor_compress::Compression;
use arbor_error::{ArborResult, arbor_bail, arbor_err};
use itertools::Itertools;

use crate::arena::{Arena, BranchId, LeafId, basket_object};
use crate::basket::{BASKET_CLASS, Basket};
use crate::span::Span;
use crate::wire::{AttFill, Class, IoFeatures, Named, ObjArray};

const BRANCH_VERSION: i16 = 13;
const BRANCH_ELEMENT_VERSION: i16 = 10;

/// Smallest capacity of the span tables.
pub const MIN_MAX_BASKETS: i32 = 10;

/// Metadata of a branch holding a member of a streamed object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementInfo {
    /// Class of the streamed object.
    pub class: String,
    /// Name of the parent class.
    pub parent: String,
    /// Class of the objects of a clones array.
    pub clones: String,
    /// Checksum of the class description.
    pub checksum: u32,
    /// Version of the class description.
    pub class_version: u16,
    /// Serial number of the member.
    pub id: i32,
    /// Branch type.
    pub btype: i32,
    /// Streamer type.
    pub stype: i32,
    /// Maximum number of elements.
    pub max: i32,
    /// First counting branch.
    pub count1: Option<BranchId>,
    /// Second counting branch.
    pub count2: Option<BranchId>,
}

/// One column (or group of columns) of a tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub(crate) named: Named,
    pub(crate) att_fill: AttFill,
    pub(crate) compress: i32,
    pub(crate) basket_size: i32,
    pub(crate) entry_offset_len: i32,
    pub(crate) write_basket: i32,
    pub(crate) entry_number: i64,
    pub(crate) iobits: IoFeatures,
    pub(crate) offset: i32,
    pub(crate) max_baskets: i32,
    pub(crate) split_level: i32,
    pub(crate) entries: i64,
    pub(crate) first_entry: i64,
    pub(crate) tot_bytes: i64,
    pub(crate) zip_bytes: i64,
    pub(crate) branches: Vec<BranchId>,
    pub(crate) leaves: Vec<LeafId>,
    pub(crate) baskets: Vec<Option<Basket>>,
    pub(crate) basket_bytes: Vec<i32>,
    pub(crate) basket_entry: Vec<i64>,
    pub(crate) basket_seek: Vec<i64>,
    pub(crate) fname: String,
    pub(crate) element: Option<ElementInfo>,
    pub(crate) parent: Option<BranchId>,
}

impl Branch {
    /// A new empty branch holding `leaves`.
    pub(crate) fn new(
        name: &str,
        title: String,
        leaves: Vec<LeafId>,
        compression: Compression,
        basket_size: i32,
        entry_offset_len: i32,
        max_baskets: i32,
    ) -> Self {
        let max_baskets = max_baskets.max(MIN_MAX_BASKETS);
        Self {
            named: Named::new(name, title),
            att_fill: AttFill::default(),
            compress: compression.settings(),
            basket_size,
            entry_offset_len,
            write_basket: 0,
            entry_number: 0,
            iobits: IoFeatures::default(),
            offset: 0,
            max_baskets,
            split_level: 0,
            entries: 0,
            first_entry: 0,
            tot_bytes: 0,
            zip_bytes: 0,
            branches: Vec::new(),
            leaves,
            baskets: Vec::new(),
            basket_bytes: Vec::new(),
            basket_entry: vec![0],
            basket_seek: Vec::new(),
            fname: String::new(),
            element: None,
            parent: None,
        }
    }

    /// Name of the branch.
    pub fn name(&self) -> &str {
        &self.named.name
    }

    /// Title of the branch, the leaf list in `name/T` notation.
    pub fn title(&self) -> &str {
        &self.named.title
    }

    /// Persisted class.
    pub fn class(&self) -> Class {
        if self.element.is_some() {
            Class::BranchElement
        } else {
            Class::Branch
        }
    }

    /// Number of entries.
    pub fn entries(&self) -> i64 {
        self.entries
    }

    /// First entry of the branch.
    pub fn first_entry(&self) -> i64 {
        self.first_entry
    }

    /// Index of the basket entries are appended to, which is also the number of flushed
    /// baskets.
    pub fn write_basket(&self) -> usize {
        usize::try_from(self.write_basket).unwrap_or(0)
    }

    /// Capacity of the span tables when encoded.
    pub fn max_baskets(&self) -> i32 {
        self.max_baskets
    }

    /// Compressed size of every flushed basket.
    pub fn basket_bytes(&self) -> &[i32] {
        &self.basket_bytes
    }

    /// First entry of every basket, followed by the end of the last flushed one.
    pub fn basket_entry(&self) -> &[i64] {
        &self.basket_entry
    }

    /// Position of every flushed basket.
    pub fn basket_seek(&self) -> &[i64] {
        &self.basket_seek
    }

    /// Capacity of the offset table of variable-length baskets, zero for fixed-size entries.
    pub fn entry_offset_len(&self) -> i32 {
        self.entry_offset_len
    }

    /// Target size of a basket payload.
    pub fn basket_size(&self) -> i32 {
        self.basket_size
    }

    /// Compression of the baskets.
    pub fn compression(&self) -> ArborResult<Compression> {
        Compression::from_settings(self.compress)
    }

    /// Uncompressed bytes, keys included.
    pub fn tot_bytes(&self) -> i64 {
        self.tot_bytes
    }

    /// Compressed bytes, keys included.
    pub fn zip_bytes(&self) -> i64 {
        self.zip_bytes
    }

    /// Nested branches.
    pub fn branches(&self) -> &[BranchId] {
        &self.branches
    }

    /// Leaves of the branch.
    pub fn leaves(&self) -> &[LeafId] {
        &self.leaves
    }

    /// Parent branch, `None` for top-level branches.
    pub fn parent(&self) -> Option<BranchId> {
        self.parent
    }

    /// Streamed member metadata.
    pub fn element(&self) -> Option<&ElementInfo> {
        self.element.as_ref()
    }

    /// The in-memory basket holding the entries not yet flushed, if any.
    pub fn resident_basket(&self) -> Option<&Basket> {
        self.baskets
            .get(self.write_basket())
            .and_then(Option::as_ref)
            .filter(|b| b.entries() > 0)
    }

    /// The span table: one span per flushed basket, then the resident basket if it holds
    /// entries.
    pub fn spans(&self) -> ArborResult<Vec<Span>> {
        let wb = self.write_basket();
        if self.basket_bytes.len() < wb
            || self.basket_seek.len() < wb
            || self.basket_entry.len() < wb + 1
        {
            arbor_bail!(
                InvalidSerde: "branch {}: span tables shorter than {} baskets",
                self.name(),
                wb
            );
        }

        let entry = |v: i64| {
            u64::try_from(v).map_err(|_| {
                arbor_err!(InvalidSerde: "branch {}: negative entry {}", self.name(), v)
            })
        };
        let mut spans = Vec::with_capacity(wb + 1);
        for (k, (beg, end)) in self.basket_entry[..=wb].iter().tuple_windows().enumerate() {
            if end <= beg {
                arbor_bail!(
                    InvalidSerde: "branch {}: basket {} spans entries {}..{}",
                    self.name(),
                    k,
                    beg,
                    end
                );
            }
            let pos = u64::try_from(self.basket_seek[k]).map_err(|_| {
                arbor_err!(InvalidSerde: "branch {}: negative seek for basket {}", self.name(), k)
            })?;
            let size = u32::try_from(self.basket_bytes[k]).map_err(|_| {
                arbor_err!(InvalidSerde: "branch {}: negative size for basket {}", self.name(), k)
            })?;
            spans.push(Span::new(entry(*beg)?, entry(*end)?, pos, size));
        }

        if self.resident_basket().is_some() && self.entries > self.basket_entry[wb] {
            spans.push(Span::new(
                entry(self.basket_entry[wb])?,
                entry(self.entries)?,
                0,
                0,
            ));
        }
        Ok(spans)
    }

    /// Record a flushed basket of `entries` entries, growing the tables when they are full.
    pub(crate) fn push_basket(&mut self, seek: u64, nbytes: i32, entries: i64) -> ArborResult<()> {
        if self.write_basket >= self.max_baskets - 1 {
            self.max_baskets = (self.max_baskets.max(MIN_MAX_BASKETS / 2)) * 2;
        }
        let seek = i64::try_from(seek)
            .map_err(|_| arbor_err!(InvalidArgument: "seek {} too large", seek))?;
        let last = self.basket_entry.last().copied().unwrap_or(self.first_entry);
        self.basket_bytes.push(nbytes);
        self.basket_seek.push(seek);
        self.basket_entry.push(last + entries);
        self.write_basket += 1;
        Ok(())
    }

    /// Decode a `TBranch` record whose class tag was already read.
    pub(crate) fn unmarshal(r: &mut RBuffer<'_>, arena: &mut Arena) -> ArborResult<Self> {
        let hdr = r.read_version()?;
        if hdr.version < 10 {
            arbor_bail!(InvalidSerde: "TBranch: version too old ({} < 10)", hdr.version);
        }
        if hdr.version > BRANCH_VERSION {
            arbor_bail!(InvalidSerde: "TBranch: unsupported version {}", hdr.version);
        }

        let named = Named::unmarshal(r)?;
        let att_fill = AttFill::unmarshal(r)?;
        let compress = r.read_i32()?;
        let basket_size = r.read_i32()?;
        let entry_offset_len = r.read_i32()?;
        let write_basket = r.read_i32()?;
        let entry_number = r.read_i64()?;
        let iobits = if hdr.version >= 13 {
            IoFeatures::unmarshal(r)?
        } else {
            IoFeatures::default()
        };
        let offset = r.read_i32()?;
        let max_baskets = r.read_i32()?;
        let mut split_level = r.read_i32()?;
        let entries = r.read_i64()?;
        let first_entry = if hdr.version >= 11 { r.read_i64()? } else { 0 };
        let tot_bytes = r.read_i64()?;
        let zip_bytes = r.read_i64()?;

        let branches = ObjArray::unmarshal(r, |class, r| arena.decode_object(class, r))?
            .elems
            .into_iter()
            .flatten()
            .map(|obj| arena.branch_id(obj))
            .collect::<ArborResult<Vec<_>>>()?;
        let leaves = ObjArray::unmarshal(r, |class, r| arena.decode_object(class, r))?
            .elems
            .into_iter()
            .flatten()
            .map(|obj| arena.leaf_id(obj))
            .collect::<ArborResult<Vec<_>>>()?;
        let baskets = ObjArray::unmarshal(r, |class, r| arena.decode_object(class, r))?
            .elems
            .into_iter()
            .map(|obj| obj.map(|obj| arena.take_basket(obj)).transpose())
            .collect::<ArborResult<Vec<_>>>()?;

        let wb = usize::try_from(write_basket).map_err(|_| {
            arbor_err!(InvalidSerde: "TBranch {}: negative write basket {}", named.name, write_basket)
        })?;
        let capacity = usize::try_from(max_baskets).unwrap_or(0);
        if capacity < wb + 1 {
            arbor_bail!(
                InvalidSerde: "TBranch {}: {} baskets exceed a capacity of {}",
                named.name,
                wb,
                max_baskets
            );
        }
        r.read_i8()?;
        let mut basket_bytes = r.read_fast_array::<i32>(capacity)?;
        r.read_i8()?;
        let mut basket_entry = r.read_fast_array::<i64>(capacity)?;
        r.read_i8()?;
        let mut basket_seek = r.read_fast_array::<i64>(capacity)?;
        basket_bytes.truncate(wb);
        basket_entry.truncate(wb + 1);
        basket_seek.truncate(wb);
        let fname = r.read_string()?;
        r.check_byte_count(&hdr, "TBranch")?;

        if split_level == 0 && !branches.is_empty() {
            split_level = 1;
        }

        Ok(Self {
            named,
            att_fill,
            compress,
            basket_size,
            entry_offset_len,
            write_basket,
            entry_number,
            iobits,
            offset,
            max_baskets,
            split_level,
            entries,
            first_entry,
            tot_bytes,
            zip_bytes,
            branches,
            leaves,
            baskets,
            basket_bytes,
            basket_entry,
            basket_seek,
            fname,
            element: None,
            parent: None,
        })
    }

    /// Decode a `TBranchElement` record whose class tag was already read.
    pub(crate) fn unmarshal_element(r: &mut RBuffer<'_>, arena: &mut Arena) -> ArborResult<Self> {
        let hdr = r.read_version()?;
        if hdr.version < 8 {
            arbor_bail!(InvalidSerde: "TBranchElement: version too old ({} < 8)", hdr.version);
        }
        if hdr.version > BRANCH_ELEMENT_VERSION {
            arbor_bail!(InvalidSerde: "TBranchElement: unsupported version {}", hdr.version);
        }

        let mut branch = Self::unmarshal(r, arena)?;
        let class = r.read_string()?;
        let parent = r.read_string()?;
        let clones = r.read_string()?;
        let checksum = r.read_u32()?;
        let class_version = if hdr.version >= 10 {
            r.read_u16()?
        } else {
            u16::try_from(r.read_u32()?).map_err(|_| {
                arbor_err!(InvalidSerde: "TBranchElement: class version out of range")
            })?
        };
        let id = r.read_i32()?;
        let btype = r.read_i32()?;
        let stype = r.read_i32()?;
        let max = r.read_i32()?;
        let mut count = || {
            r.read_object_any(|class, r| arena.decode_object(class, r))?
                .map(|obj| arena.branch_id(obj))
                .transpose()
        };
        let count1 = count()?;
        let count2 = count()?;
        r.check_byte_count(&hdr, "TBranchElement")?;

        branch.element = Some(ElementInfo {
            class,
            parent,
            clones,
            checksum,
            class_version,
            id,
            btype,
            stype,
            max,
            count1,
            count2,
        });
        Ok(branch)
    }

    /// Encode the branch record, without its class tag.
    pub(crate) fn marshal(&self, id: BranchId, w: &mut WBuffer, arena: &Arena) -> ArborResult<()> {
        if let Some(element) = &self.element {
            let beg = w.write_version(BRANCH_ELEMENT_VERSION);
            self.marshal_base(id, w, arena)?;
            w.write_string(&element.class);
            w.write_string(&element.parent);
            w.write_string(&element.clones);
            w.write_u32(element.checksum);
            w.write_u16(element.class_version);
            w.write_i32(element.id);
            w.write_i32(element.btype);
            w.write_i32(element.stype);
            w.write_i32(element.max);
            for count in [element.count1, element.count2] {
                write_branch_ref(w, count, arena)?;
            }
            return w.set_byte_count(beg);
        }
        self.marshal_base(id, w, arena)
    }

    fn marshal_base(&self, id: BranchId, w: &mut WBuffer, arena: &Arena) -> ArborResult<()> {
        let beg = w.write_version(BRANCH_VERSION);
        self.named.marshal(w)?;
        self.att_fill.marshal(w)?;
        w.write_i32(self.compress);
        w.write_i32(self.basket_size);
        w.write_i32(self.entry_offset_len);
        w.write_i32(self.write_basket);
        w.write_i64(self.entry_number);
        self.iobits.marshal(w)?;
        w.write_i32(self.offset);
        w.write_i32(self.max_baskets);
        w.write_i32(self.split_level);
        w.write_i64(self.entries);
        w.write_i64(self.first_entry);
        w.write_i64(self.tot_bytes);
        w.write_i64(self.zip_bytes);

        marshal_branches(w, "", &self.branches, arena)?;
        marshal_leaves(w, "", &self.leaves, arena)?;

        let baskets = self
            .baskets
            .iter()
            .enumerate()
            .map(|(slot, b)| b.as_ref().map(|_| (basket_object(id, slot), BASKET_CLASS)))
            .collect::<Vec<_>>();
        ObjArray::marshal(w, "", &baskets, |slot, w| match self.baskets.get(slot) {
            Some(Some(basket)) => basket.marshal_resident(w),
            _ => Ok(()),
        })?;

        let capacity = usize::try_from(self.max_baskets).unwrap_or(0);
        write_padded(w, &self.basket_bytes, capacity)?;
        write_padded(w, &self.basket_entry, capacity)?;
        write_padded(w, &self.basket_seek, capacity)?;
        w.write_string(&self.fname);
        w.set_byte_count(beg)
    }
}

fn write_padded<T: arbor_buffer::BigEndian>(
    w: &mut WBuffer,
    values: &[T],
    capacity: usize,
) -> ArborResult<()> {
    if values.len() > capacity {
        arbor_bail!(
            InvalidArgument: "{} span table values exceed a capacity of {}",
            values.len(),
            capacity
        );
    }
    w.write_i8(1);
    w.write_fast_array(values);
    w.write_fast_array(&vec![T::default(); capacity - values.len()]);
    Ok(())
}

fn write_branch_ref(w: &mut WBuffer, id: Option<BranchId>, arena: &Arena) -> ArborResult<()> {
    match id {
        Some(id) => {
            let branch = arena.branch(id)?;
            w.write_object_any(Some((id.object(), branch.class().name())), |w| {
                branch.marshal(id, w, arena)
            })
        }
        None => w.write_object_any(None, |_| Ok(())),
    }
}

/// Encode an object array of branches.
pub(crate) fn marshal_branches(
    w: &mut WBuffer,
    name: &str,
    ids: &[BranchId],
    arena: &Arena,
) -> ArborResult<()> {
    let elems = ids
        .iter()
        .map(|&id| Ok(Some((id.object(), arena.branch(id)?.class().name()))))
        .collect::<ArborResult<Vec<_>>>()?;
    ObjArray::marshal(w, name, &elems, |i, w| {
        let id = ids[i];
        arena.branch(id)?.marshal(id, w, arena)
    })
}

/// Encode an object array of leaves.
pub(crate) fn marshal_leaves(
    w: &mut WBuffer,
    name: &str,
    ids: &[LeafId],
    arena: &Arena,
) -> ArborResult<()> {
    let elems = ids
        .iter()
        .map(|&id| Ok(Some(arena.leaf(id)?.object(id))))
        .collect::<ArborResult<Vec<_>>>()?;
    ObjArray::marshal(w, name, &elems, |i, w| arena.leaf(ids[i])?.marshal(w, arena))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::leaf::{ElementKind, Leaf};

    fn branch_with_baskets(bytes: &[i32], entry: &[i64], seek: &[i64]) -> Branch {
        let mut branch = Branch::new(
            "x",
            "x/I".to_string(),
            Vec::new(),
            Compression::ZLIB_DEFAULT,
            32000,
            0,
            10,
        );
        branch.basket_bytes = bytes.to_vec();
        branch.basket_entry = entry.to_vec();
        branch.basket_seek = seek.to_vec();
        branch.write_basket = i32::try_from(bytes.len()).unwrap();
        branch.entries = entry.last().copied().unwrap_or(0);
        branch
    }

    #[test]
    fn spans_follow_the_tables() {
        let branch = branch_with_baskets(&[86], &[0, 4], &[304]);
        assert_eq!(branch.spans().unwrap(), vec![Span::new(0, 4, 304, 86)]);
    }

    #[rstest]
    #[case(&[10, 10], &[0, 4, 4], &[100, 200])]
    #[case(&[10, 10], &[0, 5, 3], &[100, 200])]
    #[case(&[10, 10], &[0, 4], &[100, 200])]
    #[case(&[-1], &[0, 4], &[100])]
    fn inconsistent_tables_are_rejected(
        #[case] bytes: &[i32],
        #[case] entry: &[i64],
        #[case] seek: &[i64],
    ) {
        assert!(branch_with_baskets(bytes, entry, seek).spans().is_err());
    }

    #[test]
    fn span_tables_grow_by_doubling() {
        let mut branch = branch_with_baskets(&[], &[0], &[]);
        for k in 0..12 {
            branch.push_basket(100 * k, 10, 3).unwrap();
        }
        assert_eq!(branch.write_basket(), 12);
        assert_eq!(branch.max_baskets(), 20);
        assert_eq!(branch.basket_entry().last(), Some(&36));
        assert!(branch.basket_entry().iter().tuple_windows().all(|(a, b)| b > a));
    }

    fn encode(arena: &Arena, id: BranchId) -> Vec<u8> {
        let mut w = WBuffer::new(0);
        let branch = arena.branch(id).unwrap();
        w.write_object_any(Some((id.object(), branch.class().name())), |w| {
            branch.marshal(id, w, arena)
        })
        .unwrap();
        w.into_vec()
    }

    fn decode(bytes: &[u8]) -> (Arena, BranchId) {
        let mut arena = Arena::default();
        let mut r = RBuffer::new(bytes, 0);
        let obj = r
            .read_object_any(|class, r| arena.decode_object(class, r))
            .unwrap()
            .unwrap();
        assert_eq!(r.remaining(), 0);
        let id = arena.branch_id(obj).unwrap();
        (arena, id)
    }

    #[test]
    fn branch_round_trip_pads_span_tables() {
        let mut arena = Arena::default();
        let leaf = arena.push_leaf(Leaf::new("x", ElementKind::I32, 1, None).unwrap());
        let mut branch = branch_with_baskets(&[86, 90], &[0, 4, 9], &[304, 390]);
        branch.leaves = vec![leaf];
        let id = arena.push_branch(branch).unwrap();

        let bytes = encode(&arena, id);
        let (back, back_id) = decode(&bytes);
        let branch = back.branch(back_id).unwrap();
        assert_eq!(branch, arena.branch(id).unwrap());
        assert_eq!(branch.max_baskets(), 10);
        assert_eq!(back.leaf(branch.leaves()[0]).unwrap().branch(), Some(back_id));

        let again = encode(&back, back_id);
        assert_eq!(again, bytes);
    }

    #[test]
    fn nested_branches_know_their_parent() {
        let mut arena = Arena::default();
        let child = branch_with_baskets(&[], &[0], &[]);
        let child = arena.push_branch(child).unwrap();
        let mut parent = branch_with_baskets(&[], &[0], &[]);
        parent.named = Named::new("evt", "evt");
        parent.branches = vec![child];
        let parent = arena.push_branch(parent).unwrap();

        let (back, id) = decode(&encode(&arena, parent));
        let root = back.branch(id).unwrap();
        assert_eq!(root.split_level, 1);
        let child = back.branch(root.branches()[0]).unwrap();
        assert_eq!(child.parent(), Some(id));
        assert_eq!(back.find_branch(&[id], "evt.x"), Some(root.branches()[0]));
    }

    #[test]
    fn element_branches_round_trip() {
        let mut arena = Arena::default();
        let mut branch = branch_with_baskets(&[], &[0], &[]);
        branch.element = Some(ElementInfo {
            class: "Event".to_string(),
            parent: "Event".to_string(),
            checksum: 0xdead_beef,
            class_version: 3,
            id: -1,
            btype: 0,
            stype: -1,
            ..ElementInfo::default()
        });
        let id = arena.push_branch(branch).unwrap();

        let (back, back_id) = decode(&encode(&arena, id));
        assert_eq!(back.branch(back_id).unwrap(), arena.branch(id).unwrap());
        assert_eq!(back.branch(back_id).unwrap().class(), Class::BranchElement);
    }

    #[test]
    fn old_versions_are_rejected() {
        let mut w = WBuffer::new(0);
        let beg = w.write_version(9);
        w.write_i32(0);
        w.set_byte_count(beg).unwrap();
        let bytes = w.into_vec();
        let err = Branch::unmarshal(&mut RBuffer::new(&bytes, 0), &mut Arena::default());
        assert!(err.unwrap_err().to_string().contains("too old"));
    }
}
