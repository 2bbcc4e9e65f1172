pub mod inverter;
pub mod link;
pub mod packet;
pub mod packet_decoder;
pub mod telemetry;
