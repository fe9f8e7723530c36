//! Implementations of the remote collaborator traits.

pub mod memory;
pub mod supabase;

pub use memory::MemoryBackend;
pub use supabase::SupabaseClient;
