//! Ready-made workflows built on the engine.

pub mod etcd;
