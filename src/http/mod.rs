pub mod connection;
pub mod request;
pub mod response;

pub use connection::{Connection, Route, handle_client};
pub use request::{ChunkState, HttpRequest, HttpVersion, Method, ParseError, ParsingState};
pub use response::{
    END_OF_STREAM, SoftError, chunk_frame, continue_reply, error_reply, pack_error, stream_reply,
    success_reply,
};
