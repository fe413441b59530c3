//! Hand-modelled prost messages matching `tensorflow/core/example/feature.proto`
//! and `example.proto`, so written files interoperate with `tf.data`.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BytesList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub value: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FloatList {
    #[prost(float, repeated, tag = "1")]
    pub value: ::prost::alloc::vec::Vec<f32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Int64List {
    #[prost(int64, repeated, tag = "1")]
    pub value: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Feature {
    #[prost(oneof = "feature::Kind", tags = "1, 2, 3")]
    pub kind: ::core::option::Option<feature::Kind>,
}

pub mod feature {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        BytesList(super::BytesList),
        #[prost(message, tag = "2")]
        FloatList(super::FloatList),
        #[prost(message, tag = "3")]
        Int64List(super::Int64List),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Features {
    #[prost(map = "string, message", tag = "1")]
    pub feature: ::std::collections::HashMap<::prost::alloc::string::String, Feature>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Example {
    #[prost(message, optional, tag = "1")]
    pub features: ::core::option::Option<Features>,
}

impl Feature {
    pub fn bytes(value: Vec<u8>) -> Self {
        Self {
            kind: Some(feature::Kind::BytesList(BytesList { value: vec![value] })),
        }
    }

    pub fn int64(value: i64) -> Self {
        Self {
            kind: Some(feature::Kind::Int64List(Int64List { value: vec![value] })),
        }
    }

    pub fn float(value: f32) -> Self {
        Self {
            kind: Some(feature::Kind::FloatList(FloatList { value: vec![value] })),
        }
    }

    /// First int64 entry, if this is an int64 feature.
    pub fn as_int64(&self) -> Option<i64> {
        match &self.kind {
            Some(feature::Kind::Int64List(list)) => list.value.first().copied(),
            _ => None,
        }
    }

    /// First bytes entry, if this is a bytes feature.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self.kind {
            Some(feature::Kind::BytesList(list)) => list.value.into_iter().next(),
            _ => None,
        }
    }
}
