pub mod codec;
pub mod command;
pub mod constants;
pub mod handshake;
pub mod packet;
pub mod response;
pub mod resultset;
pub mod wire;

pub use codec::PacketCodec;
pub use command::ClientCommand;
pub use constants::{charset, error_code, field_flag, ColumnType};
pub use handshake::{scramble_password, AuthSwitchRequest, HandshakeResponse, InitialHandshake};
pub use packet::{capabilities, status, Command, Packet};
pub use response::{encode_terminator, ErrPacket, OkPacket};
pub use resultset::{ColumnDescriptor, ResultSet, Value};
pub use wire::{WireError, WireReader, WireWrite};
