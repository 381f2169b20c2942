pub mod explain;
pub mod predict;
pub mod pretrain;
pub mod recommend;
pub mod train;
