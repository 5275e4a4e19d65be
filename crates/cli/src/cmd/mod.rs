mod converge;

pub use converge::cmd_converge;
