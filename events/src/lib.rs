// SPDX-License-Identifier: CC0-1.0

//! Types shared between the bmon edge and hub daemons.
//!
//! Everything a monitored node emits is normalized into an [`Event`], a tagged
//! value that carries its originating host and an event-time timestamp. Events
//! travel from edge to hub as JSON maps with a `_model` discriminator; the
//! structs here define that wire format as well as the identity records
//! (hosts, peers) the hub persists.

mod cohort;
mod event;
mod fingerprint;
mod host;
mod peer;
pub mod wire;

#[doc(inline)]
pub use self::{
    cohort::{is_pre_taproot, parse_daemon_version, ParseVersionError, PolicyCohort},
    event::{
        BlockConnectedEvent, BlockDisconnectedEvent, BlockDownloadTimeout, ConnectBlockDetails,
        ConnectBlockEvent, Event, HeaderToTipEvent, MempoolAccept, MempoolReject,
        ProcessLineError, ReorgEvent,
    },
    fingerprint::{fingerprint, linehash},
    host::{Host, LogProgress},
    peer::{Peer, PeerStats, PEER_IDENTITY_FIELDS},
};
