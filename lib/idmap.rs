//! Translation tables between container-namespace and host-namespace user and
//! group IDs, mirroring the shape of the kernel's `/proc/self/uid_map`.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{FerryError, FerryResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One contiguous range of an ID mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct IdMap {
    /// First ID of the range inside the container namespace.
    pub container_id: u32,

    /// First ID of the range on the host.
    pub host_id: u32,

    /// Number of IDs in the range.
    pub size: u32,
}

/// A uid/gid pair, always interpreted in a single namespace at a time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct IdPair {
    /// The user ID.
    pub uid: u32,

    /// The group ID.
    pub gid: u32,
}

/// A pair of uid and gid mapping tables that can translate ownership in
/// either direction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IdMappings {
    uid_map: Vec<IdMap>,
    gid_map: Vec<IdMap>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl IdMappings {
    /// Creates mappings from a uid table and a gid table.
    pub fn new(uid_map: impl Into<Vec<IdMap>>, gid_map: impl Into<Vec<IdMap>>) -> Self {
        Self {
            uid_map: uid_map.into(),
            gid_map: gid_map.into(),
        }
    }

    /// Whether both tables are empty, in which case translation is the identity.
    pub fn is_empty(&self) -> bool {
        self.uid_map.is_empty() && self.gid_map.is_empty()
    }

    /// Translates a container-namespace owner to the host namespace.
    pub fn to_host(&self, pair: IdPair) -> FerryResult<IdPair> {
        Ok(IdPair {
            uid: translate(&self.uid_map, pair.uid, "uid", Direction::ToHost)?,
            gid: translate(&self.gid_map, pair.gid, "gid", Direction::ToHost)?,
        })
    }

    /// Translates a host-namespace owner to the container namespace.
    pub fn to_container(&self, pair: IdPair) -> FerryResult<IdPair> {
        Ok(IdPair {
            uid: translate(&self.uid_map, pair.uid, "uid", Direction::ToContainer)?,
            gid: translate(&self.gid_map, pair.gid, "gid", Direction::ToContainer)?,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Types: private
//--------------------------------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Direction {
    ToHost,
    ToContainer,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn translate(map: &[IdMap], id: u32, kind: &'static str, direction: Direction) -> FerryResult<u32> {
    if map.is_empty() {
        return Ok(id);
    }
    for range in map {
        let (from, to) = match direction {
            Direction::ToHost => (range.container_id, range.host_id),
            Direction::ToContainer => (range.host_id, range.container_id),
        };
        if id >= from && id - from < range.size {
            return Ok(to + (id - from));
        }
    }
    Err(FerryError::IdMappingNotFound { kind, id })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
