pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod fastq;
pub mod output;
pub mod pairing;
pub mod probe;
pub mod provenance;
pub mod resolver;
pub mod subsample;
pub mod transport;
