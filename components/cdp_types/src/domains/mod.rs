// CDP Domain type definitions
// Only the HeapProfiler domain is spoken by the profiling session

pub mod heap_profiler;
