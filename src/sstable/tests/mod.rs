mod tests_basic;
mod tests_edge_cases;
mod tests_get;
mod tests_properties;
mod tests_scan;
mod tests_scan_owned;


// Priority 3 — hardening (edge cases)
mod tests_hardening;
