//! Concrete backends.
//!
//! | Backend  | Identity | Revisions        | Batch load          | Regex            |
//! |----------|----------|------------------|---------------------|------------------|
//! | memory   | `id`     | none             | tabulated           | client-side      |
//! | mongodb  | `_id`    | none             | `$in`               | `$regex`         |
//! | couchdb  | `_id`    | `_rev` (server)  | `_all_docs` keys    | Mango `$regex`   |
//! | sqlite   | `id`     | integer counter  | tabulated           | client-side      |

pub mod couch;
pub mod memory;
pub mod mongo;
pub mod sqlite;

pub use couch::{CouchAdapter, CouchConventions};
pub use memory::{MemoryAdapter, MemoryConventions};
pub use mongo::{MongoAdapter, MongoConventions};
pub use sqlite::{SqliteAdapter, SqliteConventions};
