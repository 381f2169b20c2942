pub mod metrics;
pub mod pretrain;
pub mod train;
