pub mod action;
pub mod approval;
pub mod document;
pub mod entity;
pub mod group;
pub mod principal;
