pub mod building_blocks;
