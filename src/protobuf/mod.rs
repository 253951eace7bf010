//! Generated protobuf modules
//!
//! build.rs compiles the Meshtastic client API subset under `protos/meshtastic`;
//! prost emits one file per package (meshtastic.rs).

pub mod meshtastic_generated {
    //! Generated Meshtastic protobuf types.
    #[allow(dead_code, unused_imports, clippy::all)]
    #[allow(rustdoc::invalid_html_tags)]
    mod inner {
        include!(concat!(env!("OUT_DIR"), "/meshtastic.rs"));
    }
    pub use inner::*;
}
