//! Control-plane wire types generated from `proto/mqtt_client_control.proto`.

#![allow(clippy::derive_partial_eq_without_eq)]

tonic::include_proto!("clientcontrol");
