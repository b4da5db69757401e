use serde::{Deserialize, Serialize};
use serde_json::Value;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn parse(s: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|v| v.as_str() == s)
            }
        }
    };
}

string_enum!(Role {
    Admin => "admin",
    Teacher => "teacher",
    Student => "student",
});

string_enum!(AttendanceStatus {
    Present => "present",
    Absent => "absent",
    Late => "late",
});

string_enum!(ResourceType {
    Pdf => "pdf",
    Image => "image",
    Link => "link",
    Video => "video",
});

string_enum!(TestType {
    Mcq => "mcq",
    Subjective => "subjective",
    Mixed => "mixed",
});

string_enum!(QuestionType {
    Mcq => "mcq",
    Subjective => "subjective",
});

/// Derived from the enrollment's `is_active` flag; never stored as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Institution {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub owner_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub institution_id: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub institution: Option<Institution>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub name: String,
    pub subject: String,
    pub description: Option<String>,
    pub teacher_id: String,
    pub teacher_name: String,
    pub institution_id: String,
    pub room_code: String,
    pub schedule: Option<String>,
    pub is_active: bool,
    pub student_count: usize,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub student_id: String,
    pub class_id: String,
    pub enrolled_at: String,
    pub is_active: bool,
}

/// Roster view of a student profile and its enrollment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub parent_phone: Option<String>,
    pub class_id: String,
    pub enrollment_date: String,
    pub status: StudentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub class_id: String,
    pub date: String,
    pub status: AttendanceStatus,
    pub marked_by: Option<String>,
    pub notes: Option<String>,
    pub marked_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub url: String,
    pub file_size: Option<i64>,
    pub class_id: String,
    pub uploaded_by: String,
    pub uploader_name: String,
    pub uploaded_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: TestType,
    pub class_id: String,
    pub created_by: String,
    pub creator_name: String,
    pub total_marks: i64,
    pub duration_minutes: Option<i64>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_published: bool,
    pub question_count: usize,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestQuestion {
    pub id: String,
    pub test_id: String,
    pub question_text: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub marks: i64,
    pub options: Option<Vec<String>>,
    pub correct_answer: Option<String>,
    pub order_index: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSubmission {
    pub id: String,
    pub test_id: String,
    pub student_id: String,
    pub answers: Value,
    pub score: Option<f64>,
    pub submitted_at: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoTeacherPermissions {
    #[serde(default)]
    pub can_mark_attendance: bool,
    #[serde(default)]
    pub can_upload_resources: bool,
    #[serde(default)]
    pub can_create_tests: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoTeacher {
    pub id: String,
    pub class_id: String,
    pub teacher_id: String,
    pub teacher_name: String,
    pub added_by: String,
    pub permissions: CoTeacherPermissions,
    pub added_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub recipient_id: String,
    pub class_id: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_classes: usize,
    pub total_students: usize,
    pub today_attendance: usize,
    pub upcoming_tests: usize,
}
