// Hard caps applied at the engine and tenant boundaries.

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_PROPERTIES_PER_TENANT: usize = 10_000;
pub const MAX_ROOM_TYPES_PER_TENANT: usize = 100_000;
pub const MAX_ROOMS_PER_ROOM_TYPE: usize = 10_000;
pub const MAX_RESERVATIONS_PER_ROOM_TYPE: usize = 1_000_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_BATCH_SIZE: usize = 1_000;

/// Longest stay (in nights) accepted for availability checks and reservations.
pub const MAX_STAY_NIGHTS: u32 = 730;
