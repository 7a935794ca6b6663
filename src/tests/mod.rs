//! Crate-level behavior tests. Unit tests live next to the code they cover;
//! these exercise whole components through their public seams with stub
//! collaborators.

mod pipeline;
mod stubs;
