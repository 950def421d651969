pub mod auth;
pub mod engine;

pub use auth::{
    AuthEdge, AuthEffect, AuthFlow, AuthGraph, AuthInput, AuthIntent, AuthNode, AuthService,
    AuthenticateKind, FormInput,
};
pub use engine::{Context, ContextValues, Graph, GraphCodec, GraphStore, Service};
