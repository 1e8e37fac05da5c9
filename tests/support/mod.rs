#![allow(dead_code)]

pub mod project;
pub mod segmask_env;
