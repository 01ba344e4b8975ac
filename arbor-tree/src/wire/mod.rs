//! Records shared by the tree metadata classes.
//!
//! Every class opens with a version header and a byte count. Fields introduced by later
//! versions are only read when the version says they are present, and decoding must consume
//! exactly the declared byte count.

pub use att::*;
pub use features::*;
pub use object::*;
pub use objarray::*;

mod att;
mod features;
mod objarray;
mod object;

use crate::leaf::LeafClass;

/// The classes that may be met inside tree metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    /// A plain branch.
    Branch,
    /// A branch holding a member of a streamed object.
    BranchElement,
    /// A leaf of the given class.
    Leaf(LeafClass),
    /// A basket kept in memory inside its branch.
    Basket,
}

const CLASSES: &[(&str, Class)] = &[
    ("TBranch", Class::Branch),
    ("TBranchElement", Class::BranchElement),
    ("TBasket", Class::Basket),
    ("TLeafO", Class::Leaf(LeafClass::O)),
    ("TLeafB", Class::Leaf(LeafClass::B)),
    ("TLeafS", Class::Leaf(LeafClass::S)),
    ("TLeafI", Class::Leaf(LeafClass::I)),
    ("TLeafL", Class::Leaf(LeafClass::L)),
    ("TLeafG", Class::Leaf(LeafClass::G)),
    ("TLeafF", Class::Leaf(LeafClass::F)),
    ("TLeafD", Class::Leaf(LeafClass::D)),
    ("TLeafC", Class::Leaf(LeafClass::C)),
    ("TLeafF16", Class::Leaf(LeafClass::F16)),
    ("TLeafD32", Class::Leaf(LeafClass::D32)),
    ("TLeafElement", Class::Leaf(LeafClass::Element)),
];

impl Class {
    /// Resolve a persisted class name. Classes outside the table are skipped by the decoders.
    pub fn lookup(name: &str) -> Option<Self> {
        CLASSES
            .iter()
            .find_map(|(n, class)| (*n == name).then_some(*class))
    }

    /// The persisted class name.
    pub fn name(&self) -> &'static str {
        CLASSES
            .iter()
            .find_map(|(n, class)| (class == self).then_some(*n))
            .unwrap_or("TObject")
    }
}
