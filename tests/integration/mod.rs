
mod backfill;
mod pipeline;
mod supervisor;
