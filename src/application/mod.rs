//! Application services: conversion orchestration, image handling and the error model.

pub mod convert;
pub mod error;
pub mod images;
