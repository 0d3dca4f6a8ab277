/// Protocol Buffers definitions for the wide-column data API
///
/// Generated from `proto/` by `tonic-build`: the `google.bigtable.v2`
/// messages behind the streaming `ReadRows` call and the batched
/// `MutateRows` call, plus the `Bigtable` service client.

pub mod google {
    pub mod rpc {
        tonic::include_proto!("google.rpc");
    }

    pub mod bigtable {
        pub mod v2 {
            tonic::include_proto!("google.bigtable.v2");
        }
    }
}

pub use google::bigtable::v2::*;
pub use google::rpc;

pub use read_rows_response::CellChunk;
