use axum::routing::{delete, get, post, put};
use axum::Router;
use std::sync::Arc;

use super::handlers;
use crate::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::core::health))
        .route(
            "/classrooms",
            get(handlers::classrooms::list_classrooms).post(handlers::classrooms::create_classroom),
        )
        .route(
            "/classrooms/{classroomId}/enrollments",
            get(handlers::classrooms::list_enrollments).post(handlers::classrooms::enroll_student),
        )
        .route(
            "/subjects",
            get(handlers::classrooms::list_subjects).post(handlers::classrooms::create_subject),
        )
        .route(
            "/exams",
            get(handlers::exams::list_exams).post(handlers::exams::create_exam),
        )
        .route(
            "/exams/{examId}",
            get(handlers::exams::get_exam)
                .put(handlers::exams::update_exam)
                .delete(handlers::exams::delete_exam),
        )
        .route("/exams/{examId}/subjects", post(handlers::exams::add_subject))
        .route(
            "/exams/{examId}/students",
            get(handlers::exams::list_addable_students).post(handlers::exams::add_student),
        )
        .route(
            "/exams/{examId}/students/{studentId}",
            delete(handlers::exams::remove_student),
        )
        .route(
            "/exams/{examId}/students/{studentId}/marks",
            put(handlers::exams::update_marks),
        )
        .route(
            "/exams/{examId}/students/{studentId}/absent",
            put(handlers::exams::mark_absent),
        )
        .route(
            "/exams/{examId}/generate-results",
            put(handlers::exams::generate_results),
        )
        .route("/exams/{examId}/results", get(handlers::results::exam_results))
        .route("/exams/{examId}/rank-list", get(handlers::results::rank_list))
        .route("/exams/{examId}/my-result", get(handlers::results::my_result))
        .route(
            "/daily-tests",
            get(handlers::daily_tests::list_tests).post(handlers::daily_tests::create_test),
        )
        .route(
            "/daily-tests/{testId}/marks",
            put(handlers::daily_tests::update_marks),
        )
        .route(
            "/daily-tests/{testId}/declare",
            put(handlers::daily_tests::declare),
        )
        .route(
            "/notifications",
            get(handlers::notifications::list_notifications)
                .post(handlers::notifications::send_notification),
        )
        .route(
            "/device-tokens",
            post(handlers::notifications::register_device_token),
        )
        .route(
            "/device-tokens/{token}",
            delete(handlers::notifications::unregister_device_token),
        )
        .with_state(state)
}
