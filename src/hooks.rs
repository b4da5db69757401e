//! Cached reads and invalidating writes over the data layer.
//!
//! Reads go through the shared [`QueryClient`]; each write invalidates the
//! entity names whose cached reads it can change, once it has succeeded.

use std::future::Future;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use crate::backend::Backend;
use crate::data::assessments::{self, NewQuestion, NewSubmission, NewTest};
use crate::data::attendance::{self, AttendanceMark};
use crate::data::classes::{self, ClassUpdate, NewClass};
use crate::data::co_teachers;
use crate::data::dashboard;
use crate::data::institutions::{self, NewInstitution};
use crate::data::notifications::{self, NewNotification};
use crate::data::profiles::{self, ProfileUpdate};
use crate::data::resources::{self, NewResource};
use crate::data::students;
use crate::data::current_user_id;
use crate::error::Result;
use crate::models::{
    AttendanceRecord, AttendanceStats, Class, CoTeacher, CoTeacherPermissions, DashboardStats,
    Enrollment, Institution, Notification, Profile, Resource, Student, Test, TestQuestion,
    TestSubmission,
};
use crate::query::{QueryClient, QueryKey};

/// Entity names used as the first segment of every query key.
pub mod entity {
    pub const CLASSES: &str = "classes";
    pub const STUDENTS: &str = "students";
    pub const ATTENDANCE: &str = "attendance";
    pub const ATTENDANCE_STATS: &str = "attendance-stats";
    pub const RESOURCES: &str = "resources";
    pub const TESTS: &str = "tests";
    pub const TEST_QUESTIONS: &str = "test-questions";
    pub const TEST_SUBMISSIONS: &str = "test-submissions";
    pub const CO_TEACHERS: &str = "co-teachers";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const PROFILES: &str = "profiles";
    pub const INSTITUTIONS: &str = "institutions";
    pub const DASHBOARD: &str = "dashboard";
}

use entity::*;

#[derive(Clone)]
pub struct Client {
    backend: Arc<dyn Backend>,
    queries: Arc<QueryClient>,
}

impl Client {
    pub fn new(backend: Arc<dyn Backend>, queries: Arc<QueryClient>) -> Self {
        Client { backend, queries }
    }

    pub fn queries(&self) -> &Arc<QueryClient> {
        &self.queries
    }

    async fn read<T, F, Fut>(&self, key: QueryKey, fetch: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(Arc<dyn Backend>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        self.queries
            .query(key, move || fetch(Arc::clone(&backend)))
            .await
    }

    fn settle<T>(&self, result: Result<T>, touched: &[&str]) -> Result<T> {
        if result.is_ok() {
            for name in touched {
                self.queries.invalidate_entity(name);
            }
        }
        result
    }

    // Classes

    pub async fn classes(&self) -> Result<Vec<Class>> {
        self.read(QueryKey::new(CLASSES).with("active"), |b| async move {
            classes::list_classes(b.as_ref()).await
        })
        .await
    }

    pub async fn class(&self, id: &str) -> Result<Option<Class>> {
        if id.is_empty() {
            return Ok(None);
        }
        let id = id.to_string();
        self.read(QueryKey::new(CLASSES).with("id").with(id.clone()), move |b| {
            let id = id.clone();
            async move { classes::get_class(b.as_ref(), &id).await }
        })
        .await
    }

    pub async fn create_class(&self, input: &NewClass) -> Result<Class> {
        let result = classes::create_class(self.backend.as_ref(), input).await;
        self.settle(result, &[CLASSES, DASHBOARD])
    }

    pub async fn update_class(&self, id: &str, updates: &ClassUpdate) -> Result<Class> {
        let result = classes::update_class(self.backend.as_ref(), id, updates).await;
        self.settle(result, &[CLASSES, DASHBOARD])
    }

    pub async fn delete_class(&self, id: &str) -> Result<()> {
        let result = classes::delete_class(self.backend.as_ref(), id).await;
        self.settle(result, &[CLASSES, STUDENTS, DASHBOARD])
    }

    // Students

    pub async fn students(&self) -> Result<Vec<Student>> {
        self.read(QueryKey::new(STUDENTS).with("all"), |b| async move {
            students::list_students(b.as_ref()).await
        })
        .await
    }

    pub async fn students_by_class(&self, class_id: &str) -> Result<Vec<Student>> {
        if class_id.is_empty() {
            return Ok(Vec::new());
        }
        let class_id = class_id.to_string();
        self.read(QueryKey::new(STUDENTS).with("class").with(class_id.clone()), move |b| {
            let class_id = class_id.clone();
            async move { students::students_by_class(b.as_ref(), &class_id).await }
        })
        .await
    }

    pub async fn enroll_student(&self, student_id: &str, class_id: &str) -> Result<Enrollment> {
        let result = students::enroll_student(self.backend.as_ref(), student_id, class_id).await;
        self.settle(result, &[STUDENTS, CLASSES, DASHBOARD])
    }

    pub async fn unenroll_student(&self, student_id: &str, class_id: &str) -> Result<Enrollment> {
        let result = students::unenroll_student(self.backend.as_ref(), student_id, class_id).await;
        self.settle(result, &[STUDENTS, CLASSES, DASHBOARD])
    }

    // Attendance

    pub async fn attendance(&self, class_id: &str, date: Option<&str>) -> Result<Vec<AttendanceRecord>> {
        if class_id.is_empty() {
            return Ok(Vec::new());
        }
        let class_id = class_id.to_string();
        let date = date.map(str::to_string);
        let key = QueryKey::new(ATTENDANCE)
            .with(class_id.clone())
            .with(date.clone().unwrap_or_default());
        self.read(key, move |b| {
            let class_id = class_id.clone();
            let date = date.clone();
            async move { attendance::attendance_by_class(b.as_ref(), &class_id, date.as_deref()).await }
        })
        .await
    }

    pub async fn attendance_stats(
        &self,
        class_id: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<AttendanceStats> {
        if class_id.is_empty() {
            return Ok(AttendanceStats::default());
        }
        let class_id = class_id.to_string();
        let start = start_date.map(str::to_string);
        let end = end_date.map(str::to_string);
        let key = QueryKey::new(ATTENDANCE_STATS)
            .with(class_id.clone())
            .with(start.clone().unwrap_or_default())
            .with(end.clone().unwrap_or_default());
        self.read(key, move |b| {
            let class_id = class_id.clone();
            let start = start.clone();
            let end = end.clone();
            async move {
                attendance::attendance_stats(b.as_ref(), &class_id, start.as_deref(), end.as_deref()).await
            }
        })
        .await
    }

    pub async fn mark_attendance(&self, marks: &[AttendanceMark]) -> Result<Vec<AttendanceRecord>> {
        let result = attendance::mark_attendance(self.backend.as_ref(), marks).await;
        self.settle(result, &[ATTENDANCE, ATTENDANCE_STATS, DASHBOARD])
    }

    // Resources

    pub async fn resources(&self, class_id: &str) -> Result<Vec<Resource>> {
        if class_id.is_empty() {
            return Ok(Vec::new());
        }
        let class_id = class_id.to_string();
        self.read(QueryKey::new(RESOURCES).with(class_id.clone()), move |b| {
            let class_id = class_id.clone();
            async move { resources::resources_by_class(b.as_ref(), &class_id).await }
        })
        .await
    }

    pub async fn create_resource(&self, input: &NewResource) -> Result<Resource> {
        let result = resources::create_resource(self.backend.as_ref(), input).await;
        self.settle(result, &[RESOURCES])
    }

    pub async fn delete_resource(&self, id: &str) -> Result<()> {
        let result = resources::delete_resource(self.backend.as_ref(), id).await;
        self.settle(result, &[RESOURCES])
    }

    // Tests

    pub async fn tests(&self, class_id: &str) -> Result<Vec<Test>> {
        if class_id.is_empty() {
            return Ok(Vec::new());
        }
        let class_id = class_id.to_string();
        self.read(QueryKey::new(TESTS).with(class_id.clone()), move |b| {
            let class_id = class_id.clone();
            async move { assessments::tests_by_class(b.as_ref(), &class_id).await }
        })
        .await
    }

    pub async fn test_questions(&self, test_id: &str) -> Result<Vec<TestQuestion>> {
        if test_id.is_empty() {
            return Ok(Vec::new());
        }
        let test_id = test_id.to_string();
        self.read(QueryKey::new(TEST_QUESTIONS).with(test_id.clone()), move |b| {
            let test_id = test_id.clone();
            async move { assessments::test_questions(b.as_ref(), &test_id).await }
        })
        .await
    }

    pub async fn create_test(&self, input: &NewTest) -> Result<Test> {
        let result = assessments::create_test(self.backend.as_ref(), input).await;
        self.settle(result, &[TESTS, DASHBOARD])
    }

    pub async fn add_question(&self, input: &NewQuestion) -> Result<TestQuestion> {
        let result = assessments::add_question(self.backend.as_ref(), input).await;
        // Question counts are shown on test lists.
        self.settle(result, &[TEST_QUESTIONS, TESTS])
    }

    pub async fn submit_test(&self, input: &NewSubmission) -> Result<TestSubmission> {
        let result = assessments::submit_test(self.backend.as_ref(), input).await;
        self.settle(result, &[TEST_SUBMISSIONS])
    }

    // Co-teachers

    pub async fn co_teachers(&self, class_id: &str) -> Result<Vec<CoTeacher>> {
        if class_id.is_empty() {
            return Ok(Vec::new());
        }
        let class_id = class_id.to_string();
        self.read(QueryKey::new(CO_TEACHERS).with(class_id.clone()), move |b| {
            let class_id = class_id.clone();
            async move { co_teachers::co_teachers_by_class(b.as_ref(), &class_id).await }
        })
        .await
    }

    pub async fn add_co_teacher(
        &self,
        class_id: &str,
        teacher_id: &str,
        permissions: CoTeacherPermissions,
    ) -> Result<CoTeacher> {
        let result =
            co_teachers::add_co_teacher(self.backend.as_ref(), class_id, teacher_id, permissions).await;
        self.settle(result, &[CO_TEACHERS])
    }

    pub async fn remove_co_teacher(&self, class_id: &str, teacher_id: &str) -> Result<()> {
        let result = co_teachers::remove_co_teacher(self.backend.as_ref(), class_id, teacher_id).await;
        self.settle(result, &[CO_TEACHERS])
    }

    // Notifications

    /// Keyed by recipient so a different sign-in never sees a cached inbox.
    pub async fn notifications(&self) -> Result<Vec<Notification>> {
        let me = current_user_id(self.backend.as_ref()).await?;
        self.read(QueryKey::new(NOTIFICATIONS).with(me), |b| async move {
            notifications::notifications(b.as_ref()).await
        })
        .await
    }

    pub async fn create_notification(&self, input: &NewNotification) -> Result<Notification> {
        let result = notifications::create_notification(self.backend.as_ref(), input).await;
        self.settle(result, &[NOTIFICATIONS])
    }

    pub async fn mark_notification_read(&self, id: &str) -> Result<Notification> {
        let result = notifications::mark_notification_read(self.backend.as_ref(), id).await;
        self.settle(result, &[NOTIFICATIONS])
    }

    // Profiles and institutions

    pub async fn profiles_by_institution(&self, institution_id: &str) -> Result<Vec<Profile>> {
        if institution_id.is_empty() {
            return Ok(Vec::new());
        }
        let institution_id = institution_id.to_string();
        self.read(QueryKey::new(PROFILES).with(institution_id.clone()), move |b| {
            let institution_id = institution_id.clone();
            async move { profiles::profiles_by_institution(b.as_ref(), &institution_id).await }
        })
        .await
    }

    pub async fn update_profile(&self, updates: &ProfileUpdate) -> Result<Profile> {
        let result = profiles::update_profile(self.backend.as_ref(), updates).await;
        // Names are joined into class, roster and attendance views.
        self.settle(result, &[PROFILES, CLASSES, STUDENTS, ATTENDANCE])
    }

    pub async fn institution(&self, id: &str) -> Result<Option<Institution>> {
        if id.is_empty() {
            return Ok(None);
        }
        let id = id.to_string();
        self.read(QueryKey::new(INSTITUTIONS).with(id.clone()), move |b| {
            let id = id.clone();
            async move { institutions::get_institution(b.as_ref(), &id).await }
        })
        .await
    }

    pub async fn create_institution(&self, input: &NewInstitution) -> Result<Institution> {
        let result = institutions::create_institution(self.backend.as_ref(), input).await;
        self.settle(result, &[INSTITUTIONS])
    }

    // Dashboard

    /// Keyed by day; "upcoming" is measured from the moment each fetch runs.
    pub async fn dashboard_stats(&self, today: NaiveDate) -> Result<DashboardStats> {
        self.read(QueryKey::new(DASHBOARD).with(today.to_string()), move |b| async move {
            dashboard::dashboard_stats(b.as_ref(), today, Utc::now()).await
        })
        .await
    }
}
