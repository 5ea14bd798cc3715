pub mod aggregate;
pub mod artifacts;
pub mod bins;
pub mod classify;
pub mod fetch;
pub mod prefix;
pub mod select;
pub mod settings;
pub mod traceroute;
