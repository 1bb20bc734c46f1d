//! Input bounds. Text limits mirror the column widths of the relational
//! schema this store replaces; count caps are a backstop against unbounded
//! growth of the in-memory state.

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 100;
pub const MAX_PASSWORD_LEN: usize = 100;
pub const MAX_CAPACITY_LEN: usize = 50;
pub const MAX_PLATE_LEN: usize = 10;
/// Destination and purpose on car reservations.
pub const MAX_TEXT_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_LICENSE_LEN: usize = 50;

pub const MAX_USERS: usize = 10_000;
pub const MAX_ROOMS: usize = 1_000;
pub const MAX_CARS: usize = 1_000;
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;
