pub mod aptatrans;
pub mod checkpoint;
