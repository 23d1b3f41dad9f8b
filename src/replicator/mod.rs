// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Best-effort multi-writer replication.
//!
//! Local mutations fan out as HTTP events to every discovered peer
//! ([`sender`]); inbound events dispatch to handlers registered per event
//! type ([`receiver`]). There is no ordering and no durable queue: peers
//! converge through idempotent handlers and TTL expiry in the load store.

pub mod receiver;
pub mod sender;

/// Header naming the event type of a replica message.
pub const EVENT_TYPE_HEADER: &str = "Event-Type";
/// Header propagating the originating trace id.
pub const TRACE_ID_HEADER: &str = "TraceId";
/// Path peers expose for replica ingress.
pub const REPLICA_EVENT_PATH: &str = "/v1/replica/event";
