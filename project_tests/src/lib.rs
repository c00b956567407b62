//! Cross-module scenarios for `lib_signage` live under `tests/`.
