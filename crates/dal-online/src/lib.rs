//! dal-online: low-latency online store driver
//!
//! Registers the `dal-online` location scheme with the dal backend
//! registry. A location such as `dal-online://host:5000/api#userid`
//! names the service base URL and, after the fragment, the column the
//! store keys rows by. Rows are shipped as base64 Avro container blobs;
//! keyed reads return one row per requested key, all-null where the
//! store has no row.
//!
//! Linking this crate is enough to make the scheme resolvable:
//!
//! ```no_run
//! # fn example() -> dal::Result<()> {
//! use dal_online as _;
//!
//! let catalog = dal::Catalog::load("catalog.yaml")?;
//! let row = catalog
//!     .dataset("entity.user.user_events")?
//!     .with_storage_mode("in_mem")
//!     .with_key("100")
//!     .read()?;
//! # Ok(())
//! # }
//! ```

mod client;
mod codec;

pub use client::{HttpResponse, HttpTransport, OnlineBackend, Transport};
pub use codec::AvroCodec;

dal::register_backend!(
    BACKEND_DRIVER_DAL_ONLINE,
    scheme: "dal-online",
    create: OnlineBackend::create
);
