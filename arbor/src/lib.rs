pub use arbor_tree::*;
pub use {
    arbor_buffer as buffer, arbor_compress as compress, arbor_error as error, arbor_io as io,
};
