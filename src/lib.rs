// Library exports for svmerge
pub mod config;
pub mod kd_tree;
pub mod merger;
pub mod record_table;
pub mod scheduler;
pub mod similarity;
pub mod union_find;
pub mod variant;
