//! Guardian and administration notices.
//!
//! Everything here is plain template substitution. Delivery (WhatsApp, SMS,
//! print dialog) belongs to the caller.

use std::fmt::Write;

use chrono::NaiveDate;
use serde::Serialize;

use crate::clock::format_minutes;
use crate::models::Student;

pub const FOLLOW_UP_CLAUSE: &str = "يتطلب متابعة فورية";

/// Streak length at which the escalation notice asks for immediate follow-up.
pub const FOLLOW_UP_STREAK: u32 = 3;

pub fn guardian_lateness_message(
    student_name: &str,
    arrival_time: &str,
    late_minutes: u32,
    date: NaiveDate,
) -> String {
    let duration = if late_minutes >= 60 {
        format!("{late_minutes} دقيقة ({})", format_minutes(late_minutes))
    } else {
        format!("{late_minutes} دقيقة")
    };
    format!(
        "ولي أمر الطالب/ {student_name} المحترم\n\
         نفيدكم بأن ابنكم تأخر عن الحضور إلى المدرسة يوم {date}، \
         حيث حضر الساعة {arrival_time} بتأخير قدره {duration}.\n\
         نأمل منكم الحرص على حضوره في الوقت المحدد.\n\
         إدارة المدرسة"
    )
}

pub fn guardian_absence_message(
    student_name: &str,
    date: NaiveDate,
    period: Option<&str>,
) -> String {
    let when = match period {
        Some(period) if !period.trim().is_empty() => format!("يوم {date} ({period})"),
        _ => format!("يوم {date}"),
    };
    format!(
        "ولي أمر الطالب/ {student_name} المحترم\n\
         نفيدكم بغياب ابنكم عن المدرسة {when}.\n\
         نأمل منكم التواصل مع المدرسة لتوضيح سبب الغياب.\n\
         إدارة المدرسة"
    )
}

pub fn escalation_alert_message(
    student_name: &str,
    student_id: &str,
    class_room: &str,
    total_count: u32,
    consecutive_days: u32,
) -> String {
    let mut message = format!(
        "تنبيه لوكيل شؤون الطلاب\n\
         الطالب: {student_name}\n\
         رقم الطالب: {student_id}\n\
         الفصل: {class_room}\n\
         إجمالي أيام الغياب: {total_count}\n\
         أيام الغياب المتتالية: {consecutive_days}"
    );
    if consecutive_days >= FOLLOW_UP_STREAK {
        let _ = write!(message, "\n⚠️ {FOLLOW_UP_CLAUSE}");
    }
    message
}

pub fn lateness_escalation_message(
    student_name: &str,
    student_id: &str,
    class_room: &str,
    late_days: u32,
    total_minutes: u32,
) -> String {
    format!(
        "تنبيه لوكيل شؤون الطلاب\n\
         الطالب: {student_name}\n\
         رقم الطالب: {student_id}\n\
         الفصل: {class_room}\n\
         عدد أيام التأخر: {late_days}\n\
         إجمالي مدة التأخر: {}",
        format_minutes(total_minutes)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormKind {
    GuidanceReferral,
    ParentSummon,
    EducationOfficeNotice,
}

impl FormKind {
    fn title(&self) -> &'static str {
        match self {
            FormKind::GuidanceReferral => "نموذج تحويل طالب إلى الموجه الطلابي",
            FormKind::ParentSummon => "نموذج استدعاء ولي أمر",
            FormKind::EducationOfficeNotice => "إشعار مكتب التعليم بغياب طالب",
        }
    }

    fn recipient(&self) -> &'static str {
        match self {
            FormKind::GuidanceReferral => "المكرم الموجه الطلابي",
            FormKind::ParentSummon => "المكرم ولي أمر الطالب",
            FormKind::EducationOfficeNotice => "سعادة مدير مكتب التعليم",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintableDocument {
    pub kind: FormKind,
    pub title: String,
    pub recipient: String,
    pub paragraphs: Vec<String>,
    pub absence_dates: Vec<NaiveDate>,
    pub signatures: Vec<String>,
}

pub fn printable_form_content(
    kind: FormKind,
    student: &Student,
    absence_dates: &[NaiveDate],
    total_absence_days: u32,
) -> PrintableDocument {
    let identity = format!(
        "الطالب/ {} بالصف {} فصل {}",
        student.name, student.grade, student.class_room
    );
    let paragraphs = match kind {
        FormKind::GuidanceReferral => vec![
            "السلام عليكم ورحمة الله وبركاته".to_string(),
            format!(
                "نحيل إليكم {identity} لتكرار غيابه، حيث بلغ مجموع أيام غيابه {total_absence_days} يوم، \
                 وذلك لدراسة حالته واتخاذ ما يلزم."
            ),
        ],
        FormKind::ParentSummon => vec![
            "السلام عليكم ورحمة الله وبركاته".to_string(),
            format!(
                "نظراً لتكرار غياب ابنكم {identity}، حيث بلغ مجموع أيام غيابه {total_absence_days} يوم، \
                 نأمل منكم الحضور إلى المدرسة لمقابلة وكيل شؤون الطلاب."
            ),
        ],
        FormKind::EducationOfficeNotice => vec![
            "السلام عليكم ورحمة الله وبركاته".to_string(),
            format!(
                "نفيد سعادتكم بأن {identity} قد تجاوز حد الغياب المسموح به، \
                 حيث بلغ مجموع أيام غيابه {total_absence_days} يوم، وقد اتخذت المدرسة الإجراءات النظامية."
            ),
            "نأمل الاطلاع والتوجيه.".to_string(),
        ],
    };
    let signatures = match kind {
        FormKind::GuidanceReferral => {
            vec!["وكيل شؤون الطلاب".to_string(), "الموجه الطلابي".to_string()]
        }
        FormKind::ParentSummon => {
            vec!["وكيل شؤون الطلاب".to_string(), "ولي الأمر".to_string()]
        }
        FormKind::EducationOfficeNotice => vec!["مدير المدرسة".to_string()],
    };

    PrintableDocument {
        kind,
        title: kind.title().to_string(),
        recipient: kind.recipient().to_string(),
        paragraphs,
        absence_dates: absence_dates.to_vec(),
        signatures,
    }
}

impl PrintableDocument {
    pub fn to_text(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "{}", self.title);
        let _ = writeln!(output, "{}", self.recipient);
        for paragraph in &self.paragraphs {
            let _ = writeln!(output, "{paragraph}");
        }
        let _ = writeln!(output, "تواريخ الغياب:");
        for (index, date) in self.absence_dates.iter().enumerate() {
            let _ = writeln!(output, "{}. {}", index + 1, date);
        }
        for signature in &self.signatures {
            let _ = writeln!(output, "{signature}: ....................");
        }
        output
    }

    /// Right-to-left page for the browser print dialog.
    pub fn to_html(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "<!DOCTYPE html>");
        let _ = writeln!(output, "<html dir=\"rtl\" lang=\"ar\">");
        let _ = writeln!(
            output,
            "<head><meta charset=\"utf-8\"><title>{}</title></head>",
            escape_html(&self.title)
        );
        let _ = writeln!(output, "<body>");
        let _ = writeln!(output, "<h1>{}</h1>", escape_html(&self.title));
        let _ = writeln!(output, "<p class=\"recipient\">{}</p>", escape_html(&self.recipient));
        for paragraph in &self.paragraphs {
            let _ = writeln!(output, "<p>{}</p>", escape_html(paragraph));
        }
        let _ = writeln!(output, "<table class=\"absence-dates\">");
        let _ = writeln!(output, "<tr><th>م</th><th>تاريخ الغياب</th></tr>");
        for (index, date) in self.absence_dates.iter().enumerate() {
            let _ = writeln!(output, "<tr><td>{}</td><td>{}</td></tr>", index + 1, date);
        }
        let _ = writeln!(output, "</table>");
        for signature in &self.signatures {
            let _ = writeln!(
                output,
                "<div class=\"signature\">{}: ....................</div>",
                escape_html(signature)
            );
        }
        let _ = writeln!(output, "</body>");
        let _ = writeln!(output, "</html>");
        output
    }
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// `wa.me` deep link for a guardian phone. Local numbers starting with `0`
/// get the `966` country code.
pub fn whatsapp_link(phone: &str, message: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let international = match digits.strip_prefix('0') {
        Some(rest) if !digits.starts_with("00") => format!("966{rest}"),
        _ => digits.trim_start_matches("00").to_string(),
    };
    format!(
        "https://wa.me/{}?text={}",
        international,
        urlencoding::encode(message)
    )
}
