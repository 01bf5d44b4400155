pub mod helpers;
mod tests_edge_cases;
mod tests_rotation_edge;
