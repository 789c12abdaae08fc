/// "Resources" refers to objects created once by the context and bound while recording frames.

pub mod buffer;
pub mod shader;
