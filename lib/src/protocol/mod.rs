mod address;
mod cipher;
mod framing;
mod message;

pub use address::{AddressError, SensorAddress};
pub use cipher::{AdapterKey, CipherError, KEY_LEN, KeyError, decrypt, encrypt};
pub use framing::{
    FRAME_DELIMITER, FrameBuffer, MAX_FRAME_BYTES, ProtocolError, decode_frame, encode_frame,
    read_frame, write_frame,
};
pub use message::{Message, PROTOCOL_VERSION};
