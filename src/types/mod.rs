/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types used throughout the ledger, the block store, and the election engine.

pub mod block;

pub mod data_types;

pub mod keypair;

pub mod records;

pub mod vote;
