mod sessions;
mod stats;
