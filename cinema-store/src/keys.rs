//! Shared-store key layout.

pub fn screening_lock(screening_id: i64) -> String {
    format!("lock:screening:{}", screening_id)
}

pub fn seat_layout(screening_id: i64) -> String {
    format!("seatmap:{}:layout", screening_id)
}

pub fn seat_bits(screening_id: i64) -> String {
    format!("seatmap:{}:bits", screening_id)
}

pub fn screening(screening_id: i64) -> String {
    format!("screening:{}", screening_id)
}
